use serde_json::Value;

/// JSON type a field must carry in the model's answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Text,
    TextList,
    Number,
    ObjectList(&'static [SchemaField]),
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::TextList => "array of strings",
            Self::Number => "number",
            Self::ObjectList(_) => "array of objects",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Text => value.is_string(),
            Self::TextList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Number => value.is_number(),
            Self::ObjectList(_) => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_object)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchemaField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub required: bool,
}

impl SchemaField {
    pub const fn text(name: &'static str, description: &'static str) -> Self {
        Self::required(name, FieldKind::Text, description)
    }

    pub const fn text_list(name: &'static str, description: &'static str) -> Self {
        Self::required(name, FieldKind::TextList, description)
    }

    pub const fn number(name: &'static str, description: &'static str) -> Self {
        Self::required(name, FieldKind::Number, description)
    }

    pub const fn object_list(
        name: &'static str,
        fields: &'static [SchemaField],
        description: &'static str,
    ) -> Self {
        Self::required(name, FieldKind::ObjectList(fields), description)
    }

    const fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
        }
    }
}

/// Shape of the JSON object a flow expects back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSchema {
    fields: &'static [SchemaField],
}

impl OutputSchema {
    pub const fn new(fields: &'static [SchemaField]) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &'static [SchemaField] {
        self.fields
    }

    /// Prompt suffix telling the model exactly which object to return.
    pub fn instructions(&self) -> String {
        let mut text = String::from(
            "Respond with a single JSON object and nothing else. The object has these fields:\n",
        );
        describe_fields(self.fields, 0, &mut text);
        text
    }

    /// Checks presence and JSON type of every required field, recursing into object lists.
    /// Returns the dotted path of the first offending field.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        check_fields(self.fields, value, "")
    }
}

fn describe_fields(fields: &[SchemaField], depth: usize, text: &mut String) {
    let indent = "  ".repeat(depth);
    for field in fields {
        text.push_str(&format!(
            "{indent}- \"{}\" ({}{}): {}\n",
            field.name,
            field.kind.describe(),
            if field.required { "" } else { ", optional" },
            field.description
        ));
        if let FieldKind::ObjectList(children) = field.kind {
            describe_fields(children, depth + 1, text);
        }
    }
}

fn check_fields(fields: &[SchemaField], value: &Value, prefix: &str) -> Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err(if prefix.is_empty() {
            "<root>".to_string()
        } else {
            prefix.to_string()
        });
    };

    for field in fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };

        match object.get(field.name) {
            None | Some(Value::Null) if field.required => return Err(path),
            None | Some(Value::Null) => continue,
            Some(found) if !field.kind.matches(found) => return Err(path),
            Some(found) => {
                if let (FieldKind::ObjectList(children), Some(items)) =
                    (field.kind, found.as_array())
                {
                    for (index, item) in items.iter().enumerate() {
                        check_fields(children, item, &format!("{path}[{index}]"))?;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const MATCH_FIELDS: &[SchemaField] = &[
        SchemaField::text("freelancerId", "id"),
        SchemaField::number("matchScore", "score"),
    ];
    const SCHEMA: OutputSchema = OutputSchema::new(&[
        SchemaField::text("summary", "one line"),
        SchemaField::object_list("matches", MATCH_FIELDS, "ranked matches"),
    ]);

    #[test]
    fn instructions_list_nested_fields() {
        let text = SCHEMA.instructions();
        assert!(text.contains("- \"summary\" (string): one line"));
        assert!(text.contains("  - \"matchScore\" (number): score"));
    }

    #[test]
    fn check_accepts_conforming_objects() {
        let value = json!({
            "summary": "ok",
            "matches": [{ "freelancerId": "f1", "matchScore": 91 }],
            "extra": true,
        });
        assert_eq!(SCHEMA.check(&value), Ok(()));
    }

    #[test]
    fn check_points_at_the_offending_field() {
        let missing = json!({ "matches": [] });
        assert_eq!(SCHEMA.check(&missing), Err("summary".to_string()));

        let wrong_nested = json!({
            "summary": "ok",
            "matches": [{ "freelancerId": "f1", "matchScore": "high" }],
        });
        assert_eq!(
            SCHEMA.check(&wrong_nested),
            Err("matches[0].matchScore".to_string())
        );

        assert_eq!(SCHEMA.check(&json!(["not", "an", "object"])), Err("<root>".to_string()));
    }
}
