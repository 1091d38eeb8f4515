use std::collections::BTreeSet;
use std::rc::Rc;

use crate::lexer::names::{self, NameId, Names};

/// A node of the syntax tree. The reader produces only the leaf variants,
/// `Form`, `Record` and `Dot`; the expander introduces the rest.
///
/// A `Name` key is an interned id until the resolver rewrites references
/// inside a lambda into slot indices of that lambda's frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Syntax {
    // Leaves
    Name(u32, u32),
    Symbol(NameId),
    Integer(i64),
    Boolean(bool),
    Str(Rc<str>),
    Void,
    Dot,

    // Quoted data. Elements are evaluated, so a quoted datum holds only
    // self-evaluating leaves unless quasiquote left an `Unquote` hole.
    List(Vec<Syntax>),
    NonList(Vec<Syntax>),
    Record(Vec<Syntax>),
    Unquote(Box<Syntax>),

    /// An application or a macro use.
    Form(Vec<Syntax>),

    Op(CoreOp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoreOp {
    Bind { key: u32, value: Box<Syntax> },
    Lambda(Rc<Lambda>),
    /// `line` is that of the form the arms came from, 0 if synthesized.
    Cond { arms: Vec<(Syntax, Syntax)>, line: u32 },
    Seq(Vec<Syntax>),
    /// Runs `body` in an overlay and binds each `(dest, source)` pair
    /// from it into the enclosing scope.
    Import {
        exports: Vec<(u32, NameId)>,
        body: Vec<Syntax>,
    },
    Export(Vec<Syntax>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<NameId>,
    pub variadic: bool,
    /// Names the body refers to but does not bind.
    pub free: BTreeSet<NameId>,
    /// Filled in by the resolver: the name held by each frame slot, and the
    /// enclosing scope's keys whose cells are captured at closure creation.
    pub slots: Vec<NameId>,
    pub captures: Vec<u32>,
    pub body: Vec<Syntax>,
}

impl Lambda {
    pub fn new(params: Vec<NameId>, variadic: bool, free: BTreeSet<NameId>, body: Vec<Syntax>) -> Self {
        Self {
            params,
            variadic,
            free,
            slots: Vec::new(),
            captures: Vec::new(),
            body,
        }
    }
}

impl CoreOp {
    pub fn line(&self) -> u32 {
        match self {
            CoreOp::Bind { value, .. } => value.line(),
            CoreOp::Cond { line: 0, arms } => arms
                .iter()
                .map(|(test, _)| test.line())
                .find(|&l| l != 0)
                .unwrap_or(0),
            CoreOp::Cond { line, .. } => *line,
            _ => 0,
        }
    }
}

impl Syntax {
    pub fn name(id: NameId) -> Self {
        Syntax::Name(id, 0)
    }

    pub fn form(items: Vec<Syntax>) -> Self {
        Syntax::Form(items)
    }

    pub fn as_name(&self) -> Option<NameId> {
        match self {
            Syntax::Name(id, _) => Some(*id),
            _ => None,
        }
    }

    pub fn is_name(&self, id: NameId) -> bool {
        self.as_name() == Some(id)
    }

    /// Stamps `line` on a conditional that does not carry one yet.
    pub fn at_line(mut self, line: u32) -> Self {
        if let Syntax::Op(CoreOp::Cond { line: own, .. }) = &mut self
            && *own == 0
        {
            *own = line;
        }
        self
    }

    /// First source line found in the node, or 0 for synthesized code.
    pub fn line(&self) -> u32 {
        match self {
            Syntax::Name(_, line) => *line,
            Syntax::Form(items) | Syntax::List(items) | Syntax::NonList(items) => {
                items.iter().map(Syntax::line).find(|&l| l != 0).unwrap_or(0)
            }
            Syntax::Unquote(inner) => inner.line(),
            Syntax::Op(op) => op.line(),
            _ => 0,
        }
    }

    pub fn render(&self, names: &Names) -> String {
        let join = |items: &[Syntax]| {
            items
                .iter()
                .map(|s| s.render(names))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let name = |id: u32| {
            if names::is_shadow(id) {
                format!("%{}", names.text(id))
            } else {
                names.text(id).to_string()
            }
        };

        match self {
            Syntax::Name(id, _) => name(*id),
            Syntax::Symbol(id) => format!("'{}", name(*id)),
            Syntax::Integer(n) => n.to_string(),
            Syntax::Boolean(true) => "#t".to_string(),
            Syntax::Boolean(false) => "#f".to_string(),
            Syntax::Str(s) => format!("{s:?}"),
            Syntax::Void => "#void".to_string(),
            Syntax::Dot => ".".to_string(),
            Syntax::List(items) => format!("$({})", join(items)),
            Syntax::NonList(items) => {
                let (last, init) = items.split_last().map_or((String::new(), &items[..]), |(l, i)| {
                    (l.render(names), i)
                });
                format!("$({} . {})", join(init), last)
            }
            Syntax::Record(items) => format!("#r({})", join(items)),
            Syntax::Unquote(inner) => format!("#<unquote {}>", inner.render(names)),
            Syntax::Form(items) => format!("({})", join(items)),
            Syntax::Op(op) => match op {
                CoreOp::Bind { key, value } => {
                    format!("#<bind {} {}>", name(*key), value.render(names))
                }
                CoreOp::Lambda(lambda) => {
                    let params: Vec<_> = lambda.params.iter().map(|&p| name(p)).collect();
                    let free: Vec<_> = lambda.free.iter().map(|&p| name(p)).collect();
                    format!(
                        "#<lambda{} ({}) [{}] {}>",
                        if lambda.variadic { "." } else { "" },
                        params.join(" "),
                        free.join(" "),
                        join(&lambda.body)
                    )
                }
                CoreOp::Cond { arms, .. } => {
                    let arms: Vec<_> = arms
                        .iter()
                        .map(|(t, c)| format!(" [{} {}]", t.render(names), c.render(names)))
                        .collect();
                    format!("#<cond{}>", arms.concat())
                }
                CoreOp::Seq(items) => format!("#<seq {}>", join(items)),
                CoreOp::Import { exports, body } => {
                    let exports: Vec<_> = exports.iter().map(|&(dest, _)| name(dest)).collect();
                    format!("#<import {{{}}} {}>", exports.join(" "), join(body))
                }
                CoreOp::Export(items) => format!("#<export {}>", join(items)),
            },
        }
    }
}

pub fn is_dotform(items: &[Syntax]) -> bool {
    items.len() >= 2 && items[items.len() - 2] == Syntax::Dot
}

/// Drops the dot marker of a dotted form, leaving the tail as last element.
pub fn without_dot(mut items: Vec<Syntax>) -> Vec<Syntax> {
    if is_dotform(&items) {
        items.remove(items.len() - 2);
    }
    items
}

pub fn with_dot(mut items: Vec<Syntax>) -> Vec<Syntax> {
    if !items.is_empty() {
        items.insert(items.len() - 1, Syntax::Dot);
    }
    items
}
