//! Byte-offset to line/column mapping.

/// Precomputed line starts for a source file.
pub struct LineMap {
    line_starts: Vec<u32>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (idx, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(u32::try_from(idx + 1).unwrap_or(u32::MAX));
            }
        }
        LineMap { line_starts }
    }

    /// 1-based `(line, column)` of a byte offset.
    pub fn position(&self, offset: u32) -> (u32, u32) {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let line_start = self.line_starts[line_idx];
        (
            u32::try_from(line_idx + 1).unwrap_or(u32::MAX),
            offset - line_start + 1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions() {
        let map = LineMap::new("ab\ncd\n\nx");
        assert_eq!(map.position(0), (1, 1));
        assert_eq!(map.position(1), (1, 2));
        assert_eq!(map.position(3), (2, 1));
        assert_eq!(map.position(6), (3, 1));
        assert_eq!(map.position(7), (4, 1));
    }

    #[test]
    fn offset_at_newline_belongs_to_its_line() {
        let map = LineMap::new("ab\ncd");
        assert_eq!(map.position(2), (1, 3));
    }
}
