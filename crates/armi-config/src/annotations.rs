//! Turns field documentation into TOML comments for generated config files.

use documented::{Documented, DocumentedFields};
use toml_edit::{ArrayOfTables, Decor, Item, RawString, Table};
use tracing::warn;

use crate::error::{ConfigError, Result};

/// Prepends `docs` to `decor` as `#` comment lines, keeping any comments
/// already present.
pub fn append_docs_as_toml_comments(decor: &mut Decor, docs: &str) {
    let mut prefix = decor
        .prefix()
        .and_then(RawString::as_str)
        .unwrap_or_default()
        .to_string();

    if !prefix.is_empty() && !prefix.ends_with("\n\n") {
        prefix.push_str("#\n");
    }

    for line in docs.lines() {
        if line.is_empty() {
            prefix.push_str("#\n");
        } else {
            prefix.push_str("# ");
            prefix.push_str(line);
            prefix.push('\n');
        }
    }

    decor.set_prefix(prefix);
}

/// Annotates every key of `table` with the matching field docs of `T`.
///
/// Non-root tables also get the struct-level docs of `T`.
pub fn annotate_toml_table<T>(table: &mut Table, is_root: bool) -> Result<()>
where
    T: Documented + DocumentedFields,
{
    if !is_root {
        append_docs_as_toml_comments(table.decor_mut(), T::DOCS);
    }

    for (mut key, item) in table.iter_mut() {
        let name = key.get().to_string();
        let Ok(docs) = T::get_field_docs(&name) else {
            warn!(
                "Field '{}' has no documentation in {}",
                name,
                std::any::type_name::<T>()
            );
            continue;
        };

        match item {
            Item::None => return Err(ConfigError::UnexpectedTomlItem(name)),
            Item::Value(_) => append_docs_as_toml_comments(key.leaf_decor_mut(), docs),
            Item::Table(sub_table) => append_docs_as_toml_comments(sub_table.decor_mut(), docs),
            Item::ArrayOfTables(array) => {
                if let Some(first) = array.iter_mut().next() {
                    append_docs_as_toml_comments(first.decor_mut(), docs);
                }
            }
        }
    }

    Ok(())
}

/// Annotates each table in `array` with the field docs of `T`.
pub fn annotate_toml_array_of_tables<T>(array: &mut ArrayOfTables) -> Result<()>
where
    T: Documented + DocumentedFields,
{
    for table in array.iter_mut() {
        for (mut key, item) in table.iter_mut() {
            if let (Item::Value(_), Ok(docs)) = (&*item, T::get_field_docs(key.get())) {
                append_docs_as_toml_comments(key.leaf_decor_mut(), docs);
            }
        }
    }
    Ok(())
}
