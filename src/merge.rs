// src/merge.rs

//! Document merge collaborator
//!
//! The merge cache treats merging as a pure function of its inputs and only
//! drives it: it parses the base and each patch, then folds the patches over
//! the base strictly in order through a [`DocumentMerger`].
//!
//! Patches come in two formats. A plain patch is a partial document merged
//! member by member. An advanced merge patch carries a list of instructions,
//! each addressing one location in the base by path.

use crate::cache::CacheKey;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// How a patch document is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchFormat {
    /// A partial document
    #[default]
    Document,
    /// An advanced merge document with an `Instructions` list
    Instructions,
}

/// A patch document handed to a merger
#[derive(Debug, Clone, Copy)]
pub struct Patch<'a> {
    pub key: &'a CacheKey,
    pub source: &'a Path,
    pub document: &'a Value,
    pub format: PatchFormat,
}

impl Patch<'_> {
    /// Identity used in error messages and logs
    pub fn identity(&self) -> String {
        format!("{} ({})", self.key, self.source.display())
    }
}

/// Failure to apply one patch; always names the offending patch
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("{patch} is not valid JSON: {source}")]
    Malformed {
        patch: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{patch} cannot be applied: {reason}")]
    Incompatible { patch: String, reason: String },

    #[error("{patch} could not be read: {source}")]
    Unreadable {
        patch: String,
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    pub fn patch(&self) -> &str {
        match self {
            Self::Malformed { patch, .. }
            | Self::Incompatible { patch, .. }
            | Self::Unreadable { patch, .. } => patch,
        }
    }
}

/// Combines a base document with one patch
///
/// Implementations must be deterministic: the merge cache reuses results
/// across runs whenever the inputs are unchanged.
pub trait DocumentMerger {
    fn merge(&self, base: Value, patch: &Patch<'_>) -> Result<Value, MergeError>;
}

impl<M: DocumentMerger + ?Sized> DocumentMerger for &M {
    fn merge(&self, base: Value, patch: &Patch<'_>) -> Result<Value, MergeError> {
        (**self).merge(base, patch)
    }
}

/// Recursive JSON object merge
///
/// Object members merge key by key, `null` removes a member, and any other
/// value (arrays included) replaces what was there.
///
/// Instruction patches are applied one instruction at a time; see
/// [`Action`] for what each does.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMerge;

impl DocumentMerger for JsonMerge {
    fn merge(&self, base: Value, patch: &Patch<'_>) -> Result<Value, MergeError> {
        match patch.format {
            PatchFormat::Document => merge_document(base, patch),
            PatchFormat::Instructions => apply_instructions(base, patch),
        }
    }
}

fn merge_document(mut base: Value, patch: &Patch<'_>) -> Result<Value, MergeError> {
    let Value::Object(members) = patch.document else {
        return Err(MergeError::Incompatible {
            patch: patch.identity(),
            reason: "patch root must be an object".to_string(),
        });
    };
    if !base.is_object() {
        return Err(MergeError::Incompatible {
            patch: patch.identity(),
            reason: "base document root is not an object".to_string(),
        });
    }

    for (name, value) in members {
        merge_member(&mut base, name, value);
    }
    Ok(base)
}

/// What an advanced merge instruction does at its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Action {
    /// Replace the existing value
    Replace,
    /// Remove the existing member or element
    Remove,
    /// Merge an object into the object at the path, like a plain patch
    ObjectMerge,
    /// Append the value to the array at the path
    ArrayAdd,
    /// Append every element of an array value to the array at the path
    ArrayConcat,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instruction {
    #[serde(rename = "JSONPath")]
    path: String,
    action: Action,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instructions {
    instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Member(String),
    Index(usize),
}

/// Apply every instruction in order; any failure rejects the whole patch
fn apply_instructions(mut base: Value, patch: &Patch<'_>) -> Result<Value, MergeError> {
    let incompatible = |reason: String| MergeError::Incompatible {
        patch: patch.identity(),
        reason,
    };

    let list = Instructions::deserialize(patch.document)
        .map_err(|e| incompatible(format!("invalid instructions: {}", e)))?;

    for instruction in &list.instructions {
        apply_instruction(&mut base, instruction).map_err(|reason| {
            incompatible(format!(
                "{:?} at {}: {}",
                instruction.action, instruction.path, reason
            ))
        })?;
    }
    Ok(base)
}

fn apply_instruction(document: &mut Value, instruction: &Instruction) -> Result<(), String> {
    let steps = parse_path(&instruction.path)?;
    const MISSING: &str = "path does not exist";

    match instruction.action {
        Action::Remove => {
            let Some((last, parent)) = steps.split_last() else {
                return Err("cannot remove the document root".to_string());
            };
            let parent = locate(document, parent).ok_or(MISSING)?;
            let removed = match (last, parent) {
                (Step::Member(name), Value::Object(object)) => object.remove(name).is_some(),
                (Step::Index(index), Value::Array(items)) if *index < items.len() => {
                    items.remove(*index);
                    true
                }
                _ => false,
            };
            if removed { Ok(()) } else { Err(MISSING.to_string()) }
        }
        Action::Replace => {
            *locate(document, &steps).ok_or(MISSING)? = instruction.value.clone();
            Ok(())
        }
        Action::ObjectMerge => {
            let Value::Object(members) = &instruction.value else {
                return Err("value must be an object".to_string());
            };
            let target = locate(document, &steps).ok_or(MISSING)?;
            if !target.is_object() {
                return Err("target is not an object".to_string());
            }
            for (name, value) in members {
                merge_member(target, name, value);
            }
            Ok(())
        }
        Action::ArrayAdd => {
            locate(document, &steps)
                .ok_or(MISSING)?
                .as_array_mut()
                .ok_or("target is not an array")?
                .push(instruction.value.clone());
            Ok(())
        }
        Action::ArrayConcat => {
            let Value::Array(values) = &instruction.value else {
                return Err("value must be an array".to_string());
            };
            locate(document, &steps)
                .ok_or(MISSING)?
                .as_array_mut()
                .ok_or("target is not an array")?
                .extend(values.iter().cloned());
            Ok(())
        }
    }
}

/// Parse `Member.Child[2].Name`; a leading `$` names the root
fn parse_path(path: &str) -> Result<Vec<Step>, String> {
    let trimmed = path.trim();
    let trimmed = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut steps = Vec::new();
    for segment in trimmed.split('.') {
        let (name, mut rest) = match segment.find('[') {
            Some(bracket) => segment.split_at(bracket),
            None => (segment, ""),
        };
        if !name.is_empty() {
            steps.push(Step::Member(name.to_string()));
        } else if rest.is_empty() {
            return Err(format!("empty segment in path {}", path));
        }

        while let Some(inner) = rest.strip_prefix('[') {
            let close = inner
                .find(']')
                .ok_or_else(|| format!("unclosed index in path {}", path))?;
            let index = inner[..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid index in path {}", path))?;
            steps.push(Step::Index(index));
            rest = &inner[close + 1..];
        }
        if !rest.is_empty() {
            return Err(format!("unexpected {} in path {}", rest, path));
        }
    }
    Ok(steps)
}

fn locate<'v>(document: &'v mut Value, steps: &[Step]) -> Option<&'v mut Value> {
    steps.iter().try_fold(document, |current, step| match step {
        Step::Member(name) => current.as_object_mut()?.get_mut(name),
        Step::Index(index) => current.as_array_mut()?.get_mut(*index),
    })
}

fn merge_member(target: &mut Value, name: &str, value: &Value) {
    let Value::Object(object) = target else {
        return;
    };

    match value {
        Value::Null => {
            object.remove(name);
        }
        Value::Object(members) => {
            let existing = object.entry(name.to_string()).or_insert(Value::Null);
            if !existing.is_object() {
                *existing = Value::Object(serde_json::Map::new());
            }
            for (child, child_value) in members {
                merge_member(existing, child, child_value);
            }
        }
        other => {
            object.insert(name.to_string(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn apply_as(base: Value, document: Value, format: PatchFormat) -> Result<Value, MergeError> {
        let key = CacheKey::new("MechDef", "atlas");
        let source = PathBuf::from("/mods/A/atlas.json");
        JsonMerge.merge(
            base,
            &Patch {
                key: &key,
                source: &source,
                document: &document,
                format,
            },
        )
    }

    fn apply(base: Value, document: Value) -> Result<Value, MergeError> {
        apply_as(base, document, PatchFormat::Document)
    }

    fn instructions(base: Value, list: Value) -> Result<Value, MergeError> {
        apply_as(
            base,
            json!({"TargetType": "MechDef", "Instructions": list}),
            PatchFormat::Instructions,
        )
    }

    #[test]
    fn test_nested_objects_merge() {
        let merged = apply(
            json!({"Description": {"Id": "atlas", "Cost": 10}, "Tonnage": 100}),
            json!({"Description": {"Cost": 12}}),
        )
        .unwrap();

        assert_eq!(
            merged,
            json!({"Description": {"Id": "atlas", "Cost": 12}, "Tonnage": 100})
        );
    }

    #[test]
    fn test_null_removes_member() {
        let merged = apply(json!({"a": 1, "b": 2}), json!({"b": null})).unwrap();
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn test_arrays_replace() {
        let merged = apply(json!({"tags": ["x", "y"]}), json!({"tags": ["z"]})).unwrap();
        assert_eq!(merged, json!({"tags": ["z"]}));
    }

    #[test]
    fn test_non_object_patch_is_incompatible() {
        let err = apply(json!({"a": 1}), json!([1, 2])).unwrap_err();
        assert!(matches!(err, MergeError::Incompatible { .. }));
        assert!(err.patch().contains("MechDef:atlas"));
    }

    #[test]
    fn test_object_replaces_scalar() {
        let merged = apply(json!({"a": 1}), json!({"a": {"b": null, "c": 2}})).unwrap();
        assert_eq!(merged, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_instructions_apply_in_order() {
        let base = json!({
            "Description": {"Id": "atlas", "Cost": 10},
            "Tags": ["assault"],
            "Inventory": [{"Id": "ac20", "Count": 1}, {"Id": "lrm", "Count": 2}],
            "Legacy": true
        });
        let merged = instructions(
            base,
            json!([
                {"JSONPath": "Description.Cost", "Action": "Replace", "Value": 12},
                {"JSONPath": "Inventory[1].Count", "Action": "Replace", "Value": 4},
                {"JSONPath": "$.Tags", "Action": "ArrayAdd", "Value": "hero"},
                {"JSONPath": "Tags", "Action": "ArrayConcat", "Value": ["unique"]},
                {"JSONPath": "Description", "Action": "ObjectMerge", "Value": {"Name": "Atlas II"}},
                {"JSONPath": "Inventory[0]", "Action": "Remove"},
                {"JSONPath": "Legacy", "Action": "Remove"}
            ]),
        )
        .unwrap();

        assert_eq!(
            merged,
            json!({
                "Description": {"Id": "atlas", "Cost": 12, "Name": "Atlas II"},
                "Tags": ["assault", "hero", "unique"],
                "Inventory": [{"Id": "lrm", "Count": 4}]
            })
        );
    }

    #[test]
    fn test_instruction_on_missing_path_rejects_patch() {
        let err = instructions(
            json!({"Description": {"Cost": 10}}),
            json!([{"JSONPath": "Description.Weight", "Action": "Replace", "Value": 1}]),
        )
        .unwrap_err();

        assert!(matches!(err, MergeError::Incompatible { .. }));
        assert!(err.to_string().contains("Description.Weight"));
    }

    #[test]
    fn test_instruction_list_required() {
        let err = apply_as(
            json!({"a": 1}),
            json!({"TargetType": "MechDef"}),
            PatchFormat::Instructions,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid instructions"));
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("$").unwrap(), Vec::<Step>::new());
        assert_eq!(
            parse_path("a.b[2][0].c").unwrap(),
            vec![
                Step::Member("a".to_string()),
                Step::Member("b".to_string()),
                Step::Index(2),
                Step::Index(0),
                Step::Member("c".to_string()),
            ]
        );
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[x]").is_err());
        assert!(parse_path("a[1").is_err());
    }
}
