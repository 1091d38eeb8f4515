//! Static free-name analysis over expanded syntax.
//!
//! Runs before resolution, so every name key is still an interned id.

use std::collections::{BTreeSet, HashSet};

use crate::lexer::{NameId, Names};
use crate::parser::{CoreOp, Syntax};

use super::ExpandError;

/// Names referenced in `items` that neither `defs` nor a definition in the
/// same block binds. `define` is only legal where `is_block` holds; each
/// one adds its name to `defs`. Names free in a lambda are checked against
/// the definitions of the whole block, so lambdas may refer forward.
pub fn unbound(
    items: &[Syntax],
    defs: &mut HashSet<NameId>,
    is_block: bool,
) -> Result<BTreeSet<NameId>, ExpandError> {
    let mut free = BTreeSet::new();
    let mut from_branches = BTreeSet::new();
    scan(items, defs, is_block, &mut free, &mut from_branches)?;
    free.extend(from_branches.into_iter().filter(|id| !defs.contains(id)));
    Ok(free)
}

fn scan(
    items: &[Syntax],
    defs: &mut HashSet<NameId>,
    is_block: bool,
    free: &mut BTreeSet<NameId>,
    from_branches: &mut BTreeSet<NameId>,
) -> Result<(), ExpandError> {
    for item in items {
        match item {
            Syntax::Name(id, _) => {
                if !defs.contains(id) {
                    free.insert(*id);
                }
            }
            Syntax::List(inner) | Syntax::NonList(inner) | Syntax::Form(inner) => {
                scan(inner, defs, false, free, from_branches)?;
            }
            Syntax::Op(CoreOp::Bind { key, value }) => {
                if !is_block {
                    return Err(ExpandError::new("define in non-block").at(item.line()));
                }
                scan(std::slice::from_ref(value.as_ref()), defs, false, free, from_branches)?;
                defs.insert(*key);
            }
            Syntax::Op(CoreOp::Lambda(lambda)) => from_branches.extend(lambda.free.iter().copied()),
            Syntax::Op(CoreOp::Cond { arms, .. }) => {
                for (test, consequent) in arms {
                    scan(std::slice::from_ref(test), defs, false, free, from_branches)?;
                    scan(std::slice::from_ref(consequent), defs, false, free, from_branches)?;
                }
            }
            Syntax::Op(CoreOp::Seq(inner)) => scan(inner, defs, true, free, from_branches)?,
            Syntax::Op(CoreOp::Import { exports, .. }) => {
                defs.extend(exports.iter().map(|&(dest, _)| dest));
            }
            Syntax::Op(CoreOp::Export(_))
            | Syntax::Record(_)
            | Syntax::Unquote(_)
            | Syntax::Symbol(_)
            | Syntax::Integer(_)
            | Syntax::Boolean(_)
            | Syntax::Str(_)
            | Syntax::Void
            | Syntax::Dot => {}
        }
    }
    Ok(())
}

/// First reference to `id`, descending into a lambda only when the name
/// is free there.
fn find<'a>(items: &'a [Syntax], id: NameId) -> Option<&'a Syntax> {
    items.iter().find_map(|item| match item {
        Syntax::Name(key, _) if *key == id => Some(item),
        Syntax::List(inner) | Syntax::NonList(inner) | Syntax::Form(inner) => find(inner, id),
        Syntax::Op(CoreOp::Bind { value, .. }) => find(std::slice::from_ref(value.as_ref()), id),
        Syntax::Op(CoreOp::Lambda(lambda)) if lambda.free.contains(&id) => find(&lambda.body, id),
        Syntax::Op(CoreOp::Cond { arms, .. }) => arms.iter().find_map(|(test, consequent)| {
            find(std::slice::from_ref(test), id)
                .or_else(|| find(std::slice::from_ref(consequent), id))
        }),
        Syntax::Op(CoreOp::Seq(inner)) => find(inner, id),
        _ => None,
    })
}

/// Fails with one line per unbound name, located at its first use.
pub fn report_unbound(
    free: &BTreeSet<NameId>,
    items: &[Syntax],
    names: &Names,
) -> Result<(), ExpandError> {
    if free.is_empty() {
        return Ok(());
    }

    let mut found: Vec<(u32, String)> = free
        .iter()
        .map(|&id| match find(items, id) {
            Some(Syntax::Name(_, line)) if *line != 0 => (*line, names.text(id).to_string()),
            Some(_) => (0, names.text(id).to_string()),
            None => (0, format!("(reportedly) {}", names.text(id))),
        })
        .collect();
    found.sort();

    let lines: Vec<String> = found
        .iter()
        .map(|(line, name)| match line {
            0 => name.clone(),
            n => format!("line {n}: {name}"),
        })
        .collect();
    let first_line = found.iter().map(|(line, _)| *line).find(|&l| l != 0).unwrap_or(0);
    Err(ExpandError::new(format!("unbound,\n{}", lines.join("\n"))).at(first_line))
}
