//! Prompt templates for description generation and domain inference.
//!
//! Templates are compiled in and addressed by name; `{variable}` markers are
//! substituted at call time. Unknown template names surface as
//! `DOC_TEMPLATE_NOT_FOUND`.

use crate::error::{AgentError, AgentResult, ErrorCode};

pub const COLUMN_DESCRIPTION: &str = "column-description";
pub const TABLE_DESCRIPTION: &str = "table-description";
pub const DOMAIN_INFERENCE: &str = "domain-inference";

const COLUMN_DESCRIPTION_TEMPLATE: &str = r#"You are documenting a relational database column.

Database: {database}
Schema: {schema}
Table: {table}
Column: {column}
Data type: {data_type}
Nullable: {nullable}
Default: {default}
Existing comment: {existing_comment}
Sample values: {sample_values}

Write one or two plain sentences describing what this column stores and how
it is used. Do not repeat the column name verbatim as the whole answer, do
not mention sample values directly, and do not speculate beyond the
evidence. Reply with the description only."#;

const TABLE_DESCRIPTION_TEMPLATE: &str = r#"You are documenting a relational database table.

Database: {database}
Schema: {schema}
Table: {table}
Row count (approximate): {row_count}
Columns:
{column_list}
Primary key: {primary_key}
Foreign keys: {foreign_keys}
Sample data (first rows): {sample_data}

Write two or three plain sentences summarizing what this table represents,
what each row means, and how it relates to other tables. Reply with the
description only."#;

const DOMAIN_INFERENCE_TEMPLATE: &str = r#"Group the following database tables into business domains.

Allowed domain names (use these exactly, one per table):
{allowed_domains}

Tables:
{table_list}

Reply with one line per table in the form `table_name: domain`. Every table
must appear exactly once and every domain must come from the allowed list."#;

pub fn get_template(name: &str) -> AgentResult<&'static str> {
    match name {
        COLUMN_DESCRIPTION => Ok(COLUMN_DESCRIPTION_TEMPLATE),
        TABLE_DESCRIPTION => Ok(TABLE_DESCRIPTION_TEMPLATE),
        DOMAIN_INFERENCE => Ok(DOMAIN_INFERENCE_TEMPLATE),
        other => Err(AgentError::new(
            ErrorCode::DocTemplateNotFound,
            format!("Unknown prompt template: '{}'", other),
        )),
    }
}

/// Substitute `{key}` markers. Missing variables are left in place so a bad
/// call site shows up in the prompt rather than silently vanishing.
pub fn render(template: &str, variables: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (key, value) in variables {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_templates_resolve() {
        assert!(get_template(COLUMN_DESCRIPTION).is_ok());
        assert!(get_template(TABLE_DESCRIPTION).is_ok());
        assert!(get_template(DOMAIN_INFERENCE).is_ok());
    }

    #[test]
    fn unknown_template_is_not_found() {
        let err = get_template("haiku").err().unwrap();
        assert_eq!(err.code, ErrorCode::DocTemplateNotFound);
    }

    #[test]
    fn render_substitutes_all_occurrences() {
        let out = render("{a} and {b} and {a}", &[("a", "1".into()), ("b", "2".into())]);
        assert_eq!(out, "1 and 2 and 1");
    }

    #[test]
    fn render_leaves_unknown_markers() {
        let out = render("{a} {missing}", &[("a", "x".into())]);
        assert_eq!(out, "x {missing}");
    }
}
