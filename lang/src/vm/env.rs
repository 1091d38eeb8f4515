use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::lexer::NameId;
use crate::parser::Lambda;

use super::list;
use super::value::{Value, Var, var};

/// Persistent name table: cloning is O(1), so overlays and imports can
/// take a snapshot of the globals without copying them.
pub type GlobalMap = im_rc::HashMap<u32, Var>;

/// A binding table as seen by the evaluator. Keys are interned names at
/// the top level and frame slots inside a lambda.
pub trait Environment {
    fn lookup(&self, key: u32) -> Option<Var>;

    fn bind(&mut self, key: u32, value: Var);

    /// The cell a closure captures for `key`. A key with no binding yet
    /// gets a placeholder that the first later `bind` fills in place, so
    /// mutually recursive definitions see each other.
    fn capture(&mut self, key: u32) -> Var;

    /// Interned name behind `key`, for diagnostics.
    fn name_of(&self, key: u32) -> NameId;
}

#[derive(Default)]
struct GlobalTable {
    map: GlobalMap,
    pending: HashSet<u32>,
}

/// Shared handle to the global environment. Every clone refers to the
/// same table.
#[derive(Clone, Default)]
pub struct Globals {
    table: Rc<RefCell<GlobalTable>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GlobalMap {
        self.table.borrow().map.clone()
    }

    pub fn contains(&self, key: NameId) -> bool {
        self.table.borrow().map.contains_key(&key)
    }

    pub fn keys(&self) -> Vec<NameId> {
        self.table.borrow().map.keys().copied().collect()
    }

    /// Drops placeholders that no `bind` filled, after a unit failed
    /// before reaching the definitions they stand for.
    pub fn discard_pending(&self) {
        let mut table = self.table.borrow_mut();
        let GlobalTable { map, pending } = &mut *table;
        for key in pending.drain() {
            map.remove(&key);
        }
    }
}

impl Environment for Globals {
    fn lookup(&self, key: u32) -> Option<Var> {
        self.table.borrow().map.get(&key).cloned()
    }

    fn bind(&mut self, key: u32, value: Var) {
        let placeholder = {
            let mut table = self.table.borrow_mut();
            if table.pending.remove(&key) {
                table.map.get(&key).cloned()
            } else {
                None
            }
        };
        match placeholder {
            Some(placeholder) => list::assign(&placeholder, &value),
            None => {
                self.table.borrow_mut().map.insert(key, value);
            }
        }
    }

    fn capture(&mut self, key: u32) -> Var {
        let mut table = self.table.borrow_mut();
        if let Some(cell) = table.map.get(&key) {
            return cell.clone();
        }
        let placeholder = var(Value::Void);
        table.map.insert(key, placeholder.clone());
        table.pending.insert(key);
        placeholder
    }

    fn name_of(&self, key: u32) -> NameId {
        key
    }
}

/// Private write table read-through over a snapshot of the globals. Used
/// for imported units and user macro bodies.
pub struct Overlay {
    base: GlobalMap,
    own: GlobalMap,
    pending: HashSet<u32>,
}

impl Overlay {
    pub fn new(base: GlobalMap) -> Self {
        Self {
            base,
            own: GlobalMap::new(),
            pending: HashSet::new(),
        }
    }
}

impl Environment for Overlay {
    fn lookup(&self, key: u32) -> Option<Var> {
        self.own.get(&key).or_else(|| self.base.get(&key)).cloned()
    }

    fn bind(&mut self, key: u32, value: Var) {
        if self.pending.remove(&key)
            && let Some(placeholder) = self.own.get(&key)
        {
            list::assign(placeholder, &value);
            return;
        }
        self.own.insert(key, value);
    }

    fn capture(&mut self, key: u32) -> Var {
        if let Some(cell) = self.lookup(key) {
            return cell;
        }
        let placeholder = var(Value::Void);
        self.own.insert(key, placeholder.clone());
        self.pending.insert(key);
        placeholder
    }

    fn name_of(&self, key: u32) -> NameId {
        key
    }
}

/// Activation record of one closure call: parameters, then captured
/// cells, then slots for names the body binds.
pub struct Frame {
    lambda: Rc<Lambda>,
    slots: Vec<Option<Var>>,
    pending: Vec<u32>,
}

impl Frame {
    pub fn new(lambda: Rc<Lambda>) -> Self {
        let slots = vec![None; lambda.slots.len()];
        Self {
            lambda,
            slots,
            pending: Vec::new(),
        }
    }

    pub fn set(&mut self, slot: usize, value: Var) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(value);
        }
    }
}

impl Environment for Frame {
    fn lookup(&self, key: u32) -> Option<Var> {
        self.slots.get(key as usize).cloned().flatten()
    }

    fn bind(&mut self, key: u32, value: Var) {
        if let Some(i) = self.pending.iter().position(|&k| k == key)
            && let Some(Some(placeholder)) = self.slots.get(key as usize)
        {
            self.pending.swap_remove(i);
            list::assign(placeholder, &value);
            return;
        }
        self.set(key as usize, value);
    }

    fn capture(&mut self, key: u32) -> Var {
        if let Some(cell) = self.lookup(key) {
            return cell;
        }
        let placeholder = var(Value::Void);
        self.set(key as usize, placeholder.clone());
        self.pending.push(key);
        placeholder
    }

    fn name_of(&self, key: u32) -> NameId {
        self.lambda.slots.get(key as usize).copied().unwrap_or(key)
    }
}
