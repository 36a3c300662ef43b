//! Line-level schema text parsing.
//!
//! This module is pure: it classifies declarations and normalizes type
//! names, but never touches the registry. Nested message references come
//! back as [`Declaration::MessageField`] with the normalized base type name;
//! the registry performs the recursive resolution.

use roslink_types::RosError;

use crate::descriptor::Role;
use crate::field::{
    ArraySpec, ConstantDescriptor, PrimitiveType, parse_constant_literal,
};

/// Package that owns the bare `Header` type name.
pub const HEADER_PACKAGE: &str = "std_msgs";

/// One successfully classified schema line.
#[derive(Debug, Clone)]
pub enum Declaration {
    Constant(ConstantDescriptor),
    PrimitiveField {
        name: String,
        /// Type spelling as written, array suffix included.
        type_name: String,
        ty: PrimitiveType,
        array: ArraySpec,
    },
    /// A field referencing another message type. `base_type` is the
    /// normalized `pkg/Name` the caller must resolve recursively.
    MessageField {
        name: String,
        /// Normalized spelling, array suffix included.
        type_name: String,
        base_type: String,
        array: ArraySpec,
    },
}

/// Qualify a bare type name with its surrounding package.
///
/// `Header` always lives in `std_msgs`; any other bare name takes the
/// current schema's package; names already containing `/` pass through.
pub fn normalize_type_name(name: &str, package: &str) -> String {
    if name == "Header" {
        format!("{HEADER_PACKAGE}/{name}")
    } else if name.contains('/') || package.is_empty() {
        name.to_string()
    } else {
        format!("{package}/{name}")
    }
}

/// Drop a trailing `#` comment unless the `#` sits inside a constant's
/// literal region (an `=` appearing before it).
pub fn strip_comment(line: &str) -> &str {
    let eq = line.find('=');
    let hash = line.find('#');
    match (eq, hash) {
        (Some(e), Some(h)) if e < h => line,
        (_, Some(h)) => &line[..h],
        (_, None) => line,
    }
}

/// Select the half of a combined request+response document that belongs to
/// `role`. [`Role::Message`] documents pass through whole. A `.srv` text
/// with no `---` divider is treated as request-only.
pub fn split_document(text: &str, role: Role) -> String {
    if role == Role::Message {
        return text.to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    let divider = lines.iter().position(|l| *l == "---");
    let selected: &[&str] = match (role, divider) {
        (Role::Request, Some(i)) => &lines[..i],
        (Role::Response, Some(i)) => &lines[i + 1..],
        (Role::Request, None) => &lines[..],
        (Role::Response, None) => &[],
        (Role::Message, _) => unreachable!(),
    };
    selected.join("\n")
}

/// Split a type spelling into (base, array spec).
fn split_array(type_name: &str) -> Result<(&str, ArraySpec), RosError> {
    let Some(open) = type_name.find('[') else {
        return Ok((type_name, ArraySpec::None));
    };
    if !type_name.ends_with(']') {
        return Err(RosError::SchemaParse {
            line: type_name.to_string(),
            reason: "unterminated array suffix".to_string(),
        });
    }
    let base = &type_name[..open];
    let inner = &type_name[open + 1..type_name.len() - 1];
    if inner.is_empty() {
        Ok((base, ArraySpec::Dynamic))
    } else {
        let n: usize = inner.parse().map_err(|_| RosError::SchemaParse {
            line: type_name.to_string(),
            reason: format!("invalid fixed array length '{inner}'"),
        })?;
        Ok((base, ArraySpec::Fixed(n)))
    }
}

/// Classify one schema line. Returns `Ok(None)` for blank/comment lines.
pub fn parse_line(raw: &str, package: &str) -> Result<Option<Declaration>, RosError> {
    let line = strip_comment(raw.trim()).trim_end();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(space) = line.find(' ') else {
        return Err(RosError::SchemaParse {
            line: raw.trim().to_string(),
            reason: "expected '<type> <name>'".to_string(),
        });
    };
    let type_str = &line[..space];
    let rest = &line[space + 1..];

    if let Some(eq) = rest.find('=') {
        // Constant declaration.
        let name = rest[..eq].trim().to_string();
        let ty = PrimitiveType::from_name(type_str).ok_or_else(|| RosError::SchemaParse {
            line: raw.trim().to_string(),
            reason: format!("constants must have a primitive type, got '{type_str}'"),
        })?;
        let mut literal = rest[eq + 1..].trim().to_string();
        // A `#` inside a string constant is literal text; for every other
        // type it starts a trailing comment.
        if ty != PrimitiveType::String {
            if let Some(hash) = literal.find('#') {
                literal.truncate(hash);
                literal.truncate(literal.trim_end().len());
            }
        }
        let value = parse_constant_literal(ty, &literal)?;
        return Ok(Some(Declaration::Constant(ConstantDescriptor {
            name,
            type_name: type_str.to_string(),
            value,
            literal,
        })));
    }

    let name = rest.trim().to_string();
    if name.is_empty() {
        return Err(RosError::SchemaParse {
            line: raw.trim().to_string(),
            reason: "field declaration is missing a name".to_string(),
        });
    }

    let (base, array) = split_array(type_str)?;
    if let Some(ty) = PrimitiveType::from_name(base) {
        return Ok(Some(Declaration::PrimitiveField {
            name,
            type_name: type_str.to_string(),
            ty,
            array,
        }));
    }

    let base_norm = normalize_type_name(base, package);
    let suffix = &type_str[base.len()..];
    Ok(Some(Declaration::MessageField {
        name,
        type_name: format!("{base_norm}{suffix}"),
        base_type: base_norm,
        array,
    }))
}
