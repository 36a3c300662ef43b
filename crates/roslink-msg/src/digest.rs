//! Type digest computation.
//!
//! The signature string is one line per constant (`<type> <name>=<literal>`,
//! declaration order) followed by one line per field (`<type> <name>`, with
//! nested message fields contributing their own digest hex in place of the
//! type spelling). The two sections are joined by a single newline only when
//! both are non-empty. The MD5 of that string is the type digest.

use md5::{Digest as _, Md5};

use crate::descriptor::Digest;
use crate::field::{ConstantDescriptor, FieldDescriptor, FieldKind};

/// Build the exact signature string that gets hashed.
pub fn signature_string(
    constants: &[ConstantDescriptor],
    fields: &[FieldDescriptor],
) -> String {
    let constant_lines = constants
        .iter()
        .map(|c| format!("{} {}={}", c.type_name, c.name, c.literal))
        .collect::<Vec<_>>()
        .join("\n");

    let field_lines = fields
        .iter()
        .map(|f| match &f.kind {
            // A nested message contributes its digest, never its name; the
            // array suffix vanishes with the type spelling.
            FieldKind::Message(nested) => format!("{} {}", nested.digest.to_hex(), f.name),
            FieldKind::Primitive(_) => format!("{} {}", f.type_name, f.name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut signature = constant_lines;
    if !signature.is_empty() && !field_lines.is_empty() {
        signature.push('\n');
    }
    signature.push_str(&field_lines);
    signature
}

/// Hash a signature with MD5.
pub fn compute(constants: &[ConstantDescriptor], fields: &[FieldDescriptor]) -> Digest {
    let mut hasher = Md5::new();
    hasher.update(signature_string(constants, fields).as_bytes());
    let out = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&out);
    Digest(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ArraySpec, ConstantValue, PrimitiveType};

    fn prim_field(ty: &str, name: &str) -> FieldDescriptor {
        let base = ty.split('[').next().unwrap();
        FieldDescriptor {
            name: name.to_string(),
            type_name: ty.to_string(),
            kind: FieldKind::Primitive(PrimitiveType::from_name(base).unwrap()),
            array: if ty.ends_with("[]") {
                ArraySpec::Dynamic
            } else {
                ArraySpec::None
            },
        }
    }

    fn int_constant(name: &str, v: i64) -> ConstantDescriptor {
        ConstantDescriptor {
            name: name.to_string(),
            type_name: "int32".to_string(),
            value: ConstantValue::Int(v),
            literal: v.to_string(),
        }
    }

    #[test]
    fn signature_joins_sections_with_single_newline() {
        let sig = signature_string(&[int_constant("y", 5)], &[prim_field("int32", "x")]);
        assert_eq!(sig, "int32 y=5\nint32 x");
    }

    #[test]
    fn signature_omits_join_when_one_section_empty() {
        assert_eq!(signature_string(&[], &[prim_field("int32", "x")]), "int32 x");
        assert_eq!(signature_string(&[int_constant("y", 5)], &[]), "int32 y=5");
        assert_eq!(signature_string(&[], &[]), "");
    }

    #[test]
    fn digest_of_known_signature() {
        // md5("int32 y=5\nint32 x")
        let d = compute(&[int_constant("y", 5)], &[prim_field("int32", "x")]);
        assert_eq!(d.to_hex(), "f1794ca3a9683af251b3759b634978d8");
    }

    #[test]
    fn digest_matches_reference_string_type() {
        // std_msgs/String is a single "string data" field; the reference
        // implementation family hashes it to this exact value.
        let d = compute(&[], &[prim_field("string", "data")]);
        assert_eq!(d.to_hex(), "992ce8a1687cec8c8bd883ec73ca41d1");
    }

    #[test]
    fn field_order_changes_digest() {
        let a = compute(&[], &[prim_field("int32", "x"), prim_field("int32", "y")]);
        let b = compute(&[], &[prim_field("int32", "y"), prim_field("int32", "x")]);
        assert_ne!(a, b);
        assert_eq!(a.to_hex(), "bd7b43fd41d4c47bf5c703cc7d016709");
        assert_eq!(b.to_hex(), "0beeee48659a4bcab808b6fa27e353c4");
    }

    #[test]
    fn digest_is_deterministic() {
        let fields = [prim_field("uint32", "seq"), prim_field("time", "stamp")];
        assert_eq!(compute(&[], &fields), compute(&[], &fields));
    }

    #[test]
    fn primitive_array_keeps_suffix_in_signature() {
        let sig = signature_string(&[], &[prim_field("int32[]", "values")]);
        assert_eq!(sig, "int32[] values");
    }
}
