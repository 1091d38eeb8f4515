use std::collections::HashMap;
use std::rc::Rc;

/// Dense id of an interned name. Ids are stable for the life of a session.
pub type NameId = u32;

pub const THEN: NameId = 0;
pub const ELSE: NameId = 1;
pub const QUOTE: NameId = 2;
pub const QUASIQUOTE: NameId = 3;
pub const UNQUOTE: NameId = 4;
pub const MACRO: NameId = 5;
pub const CAR: NameId = 6;
pub const EQVP: NameId = 7;
pub const LIST: NameId = 8;
pub const NONLIST: NameId = 9;
pub const SET_BANG_BANG: NameId = 10;
pub const DUP: NameId = 11;
pub const ERROR: NameId = 12;
pub const SPLICE: NameId = 13;
pub const IMPORT: NameId = 14;

const KNOWN: [&str; 15] = [
    "=>", "else", "quote", "quasiquote", "unquote", "macro", "car", "eqv?", "list", "nonlist",
    "set!!", "dup", "error", "splice", "import",
];

/// Marks a placeholder binding that shadows a real name while a `letrec`
/// allocates its cells. Such ids never reach the name table.
const SHADOW: NameId = 1 << 31;

pub fn shadow(id: NameId) -> NameId {
    id | SHADOW
}

pub fn is_shadow(id: NameId) -> bool {
    id & SHADOW != 0
}

/// Append-only bijection between identifier text and dense ids.
#[derive(Debug, Clone)]
pub struct Names {
    texts: Vec<Rc<str>>,
    index: HashMap<Rc<str>, NameId>,
}

impl Names {
    pub fn new() -> Self {
        let mut names = Self {
            texts: Vec::new(),
            index: HashMap::new(),
        };
        for text in KNOWN {
            names.intern(text);
        }
        names
    }

    pub fn intern(&mut self, text: &str) -> NameId {
        if let Some(&id) = self.index.get(text) {
            return id;
        }
        let id = self.texts.len() as NameId;
        let text: Rc<str> = Rc::from(text);
        self.texts.push(text.clone());
        self.index.insert(text, id);
        id
    }

    pub fn lookup(&self, text: &str) -> Option<NameId> {
        self.index.get(text).copied()
    }

    /// Text of a name. Placeholder ids resolve to the name they shadow.
    pub fn text(&self, id: NameId) -> &str {
        self.texts
            .get((id & !SHADOW) as usize)
            .map(|t| t.as_ref())
            .unwrap_or("?")
    }

    /// Mints a fresh name of the form `&N` that no source text has used.
    pub fn gensym(&mut self) -> NameId {
        let mut n = self.texts.len();
        loop {
            let text = format!("&{n}");
            if !self.index.contains_key(text.as_str()) {
                return self.intern(&text);
            }
            n += 1;
        }
    }
}

impl Default for Names {
    fn default() -> Self {
        Self::new()
    }
}
