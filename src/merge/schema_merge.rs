//! Three-way schema merge, column by column.
//!
//! Columns are matched by tag. Each attribute of a column merges on its own:
//! a side that left the attribute as it was in the base takes the other
//! side's value. Dropping a column wins over any change the other side made
//! to it. Anything else both sides changed differently is a conflict.

use std::collections::BTreeSet;

use crate::catalog::{Column, Schema, Tag};

/// Merge `ours` and `theirs` against `base`. The error is a human readable
/// reason for the table conflict.
pub(crate) fn merge_schemas(base: &Schema, ours: &Schema, theirs: &Schema) -> Result<Schema, String> {
    if ours == theirs || theirs == base {
        return Ok(ours.clone());
    }
    if ours == base {
        return Ok(theirs.clone());
    }

    let mut columns = Vec::new();
    let mut placed: BTreeSet<Tag> = BTreeSet::new();

    // ours' order first, then columns only theirs has, in theirs' order
    for col in ours.columns().iter().chain(theirs.columns()) {
        if !placed.insert(col.tag) {
            continue;
        }
        let merged = merge_column(
            base.column(col.tag),
            ours.column(col.tag),
            theirs.column(col.tag),
        )?;
        if let Some(column) = merged {
            columns.push(column);
        }
    }

    Schema::new(columns).map_err(|e| format!("merged schema is invalid: {}", e))
}

fn merge_column(base: Option<&Column>, ours: Option<&Column>, theirs: Option<&Column>) -> Result<Option<Column>, String> {
    match (base, ours, theirs) {
        // dropped on at least one side
        (Some(_), None, _) | (Some(_), _, None) => Ok(None),
        (None, Some(o), Some(t)) if o == t => Ok(Some(o.clone())),
        (None, Some(o), Some(_)) => Err(format!("column '{}' added differently on both sides", o.name)),
        (None, Some(c), None) | (None, None, Some(c)) => Ok(Some(c.clone())),
        (Some(b), Some(o), Some(t)) => {
            let name = pick(&b.name, &o.name, &t.name).ok_or_else(|| {
                format!("column '{}' renamed to '{}' and '{}'", b.name, o.name, t.name)
            })?;
            let conflict = |what: &str| format!("column '{}': {} changed on both sides", b.name, what);
            Ok(Some(Column {
                tag: b.tag,
                name: name.clone(),
                data_type: *pick(&b.data_type, &o.data_type, &t.data_type).ok_or_else(|| conflict("type"))?,
                nullable: *pick(&b.nullable, &o.nullable, &t.nullable).ok_or_else(|| conflict("nullability"))?,
                key: *pick(&b.key, &o.key, &t.key).ok_or_else(|| conflict("primary key role"))?,
                default: pick(&b.default, &o.default, &t.default)
                    .ok_or_else(|| conflict("default"))?
                    .clone(),
                description: pick(&b.description, &o.description, &t.description)
                    .ok_or_else(|| conflict("description"))?
                    .clone(),
            }))
        }
        (None, None, None) => Ok(None),
    }
}

/// three-way pick of one attribute
fn pick<'a, T: PartialEq>(base: &'a T, ours: &'a T, theirs: &'a T) -> Option<&'a T> {
    if ours == theirs || theirs == base {
        Some(ours)
    } else if ours == base {
        Some(theirs)
    } else {
        None
    }
}
