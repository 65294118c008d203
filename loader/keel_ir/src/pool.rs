//! Arena ownership of items.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::item::{Item, ItemData};
use crate::ItemType;

/// Stable handle to an item in an [`ItemPool`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u32);

impl ItemId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

/// Owns every item of one project for the project's lifetime.
///
/// Items reference each other (prototype, scope, parent, children, nested
/// values) by `ItemId` only; the pool resolves ids to shared nodes. Nodes
/// use interior mutability because the loader mutates items while other
/// parts of the tree are being traversed.
#[derive(Default)]
pub struct ItemPool {
    items: RefCell<Vec<Rc<RefCell<ItemData>>>>,
}

impl ItemPool {
    pub fn new() -> Self {
        ItemPool::default()
    }

    /// Allocates a new item of the given type.
    pub fn create(&self, typ: ItemType) -> Item {
        let mut items = self.items.borrow_mut();
        let id = ItemId(u32::try_from(items.len()).unwrap_or_else(|_| {
            // 4 billion items would exhaust memory long before this.
            panic!("item pool capacity exceeded")
        }));
        let data = Rc::new(RefCell::new(ItemData::new(typ)));
        items.push(Rc::clone(&data));
        Item::from_parts(id, data)
    }

    /// Resolves an id to its item.
    pub fn get(&self, id: ItemId) -> Item {
        let items = self.items.borrow();
        let data = Rc::clone(&items[id.index()]);
        Item::from_parts(id, data)
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}
