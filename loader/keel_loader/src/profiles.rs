//! Profiles: named key/value stores with base-profile inheritance.

use std::collections::BTreeMap;

use keel_diagnostic::{ErrorInfo, Result};
use keel_ir::Variant;

const BASE_PROFILE_KEY: &str = "baseProfile";

/// An in-memory profile store.
///
/// Each profile maps dotted keys (`cpp.toolchainPath`) to values; the
/// reserved key `baseProfile` names a profile to inherit from. The store
/// itself is supplied by the embedder (read from its settings directory).
#[derive(Clone, Debug, Default)]
pub struct Profiles {
    profiles: BTreeMap<String, BTreeMap<String, Variant>>,
}

impl Profiles {
    pub fn new() -> Self {
        Profiles::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: BTreeMap<String, Variant>) {
        self.profiles.insert(name.into(), values);
    }

    pub fn set_value(&mut self, profile: &str, key: impl Into<String>, value: Variant) {
        self.profiles
            .entry(profile.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// The whole store as a variant map, for persistence.
    pub fn to_variant(&self) -> Variant {
        Variant::Map(
            self.profiles
                .iter()
                .map(|(name, values)| {
                    (
                        name.clone(),
                        Variant::Map(values.clone()),
                    )
                })
                .collect(),
        )
    }

    /// Looks a key up in a profile, following the base-profile chain.
    pub fn value(&self, profile: &str, key: &str) -> Result<Variant> {
        let mut chain = Vec::new();
        self.inherited_value(profile, key, &mut chain)
    }

    fn inherited_value(
        &self,
        profile: &str,
        key: &str,
        chain: &mut Vec<String>,
    ) -> Result<Variant> {
        self.extend_and_check_chain(profile, chain)?;
        let values = self.profile_values(profile)?;
        if let Some(value) = values.get(key) {
            return Ok(value.clone());
        }
        match self.base_profile(values) {
            Some(base) => self.inherited_value(&base, key, chain),
            None => Ok(Variant::Undefined),
        }
    }

    /// All keys of a profile, base profiles included, flattened into one
    /// map; nearer definitions win.
    pub fn flattened(&self, profile: &str) -> Result<BTreeMap<String, Variant>> {
        let mut chain = Vec::new();
        let mut result = BTreeMap::new();
        self.flatten_into(profile, &mut result, &mut chain)?;
        result.remove(BASE_PROFILE_KEY);
        Ok(result)
    }

    fn flatten_into(
        &self,
        profile: &str,
        result: &mut BTreeMap<String, Variant>,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        self.extend_and_check_chain(profile, chain)?;
        let values = self.profile_values(profile)?;
        if let Some(base) = self.base_profile(values) {
            self.flatten_into(&base, result, chain)?;
        }
        for (key, value) in values {
            result.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn profile_values(&self, profile: &str) -> Result<&BTreeMap<String, Variant>> {
        self.profiles.get(profile).ok_or_else(|| {
            ErrorInfo::profile(format!("Unknown profile '{profile}'."))
        })
    }

    fn base_profile(&self, values: &BTreeMap<String, Variant>) -> Option<String> {
        values
            .get(BASE_PROFILE_KEY)
            .and_then(Variant::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn extend_and_check_chain(&self, profile: &str, chain: &mut Vec<String>) -> Result<()> {
        if chain.iter().any(|entry| entry == profile) {
            chain.push(profile.to_string());
            return Err(ErrorInfo::profile(format!(
                "Circular profile inheritance. Cycle is '{}'.",
                chain.join(" -> ")
            )));
        }
        chain.push(profile.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> Profiles {
        let mut profiles = Profiles::new();
        profiles.set_value("base", "cpp.warningLevel", Variant::string("all"));
        profiles.set_value("base", "cpp.debug", Variant::Bool(true));
        profiles.set_value("derived", BASE_PROFILE_KEY, Variant::string("base"));
        profiles.set_value("derived", "cpp.debug", Variant::Bool(false));
        profiles
    }

    #[test]
    fn inherited_lookup() {
        let profiles = store();
        assert_eq!(
            profiles.value("derived", "cpp.warningLevel").unwrap(),
            Variant::string("all")
        );
        assert_eq!(
            profiles.value("derived", "cpp.debug").unwrap(),
            Variant::Bool(false)
        );
        assert_eq!(
            profiles.value("derived", "missing").unwrap(),
            Variant::Undefined
        );
    }

    #[test]
    fn flattened_nearer_definitions_win() {
        let profiles = store();
        let flat = profiles.flattened("derived").unwrap();
        assert_eq!(flat.get("cpp.debug"), Some(&Variant::Bool(false)));
        assert_eq!(flat.get("cpp.warningLevel"), Some(&Variant::string("all")));
        assert!(!flat.contains_key(BASE_PROFILE_KEY));
    }

    #[test]
    fn cycle_detection_raises_before_lookup() {
        let mut profiles = Profiles::new();
        profiles.set_value("a", BASE_PROFILE_KEY, Variant::string("b"));
        profiles.set_value("b", BASE_PROFILE_KEY, Variant::string("a"));
        let error = profiles.value("a", "anything").unwrap_err();
        assert!(error.to_string().contains("Circular profile inheritance"));
        assert!(error.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let profiles = Profiles::new();
        assert!(profiles.value("nope", "k").is_err());
    }
}
