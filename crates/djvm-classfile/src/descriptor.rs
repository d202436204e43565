//! Field and method descriptor utilities.
//!
//! Descriptors are kept as strings throughout the model; these helpers walk
//! the token grammar, rewrite object type tokens, count operand slots, and
//! render the dotted display form used in rule violation messages.

use crate::ClassFormatError;

/// Apply `f` to every object type token in a field or method descriptor,
/// leaving primitives and array brackets intact. `f` receives and returns
/// internal class names without the `L`/`;` framing.
pub fn map_types(descriptor: &str, f: &dyn Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(descriptor.len());
    let bytes = descriptor.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'L' => {
                let end = descriptor[i..]
                    .find(';')
                    .map(|n| i + n)
                    .unwrap_or(descriptor.len());
                let name = &descriptor[i + 1..end];
                out.push('L');
                out.push_str(&f(name));
                out.push(';');
                i = end + 1;
            }
            c => {
                out.push(c as char);
                i += 1;
            }
        }
    }
    out
}

/// Split a method descriptor into parameter type tokens and the return token.
pub fn method_parts(descriptor: &str) -> Result<(Vec<String>, String), ClassFormatError> {
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .ok_or_else(|| bad(descriptor))?;
    let (params, ret) = inner;
    let mut tokens = Vec::new();
    let mut rest = params;
    while !rest.is_empty() {
        let token_len = token_length(rest).ok_or_else(|| bad(descriptor))?;
        tokens.push(rest[..token_len].to_owned());
        rest = &rest[token_len..];
    }
    if token_length(ret) != Some(ret.len()) && ret != "V" {
        return Err(bad(descriptor));
    }
    Ok((tokens, ret.to_owned()))
}

fn bad(descriptor: &str) -> ClassFormatError {
    ClassFormatError::Inconsistent(format!("malformed descriptor: {descriptor}"))
}

/// Length in bytes of the single type token at the start of `s`.
fn token_length(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b'[' {
        i += 1;
    }
    match bytes.get(i)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(i + 1),
        b'L' => s[i..].find(';').map(|n| i + n + 1),
        _ => None,
    }
}

/// Operand stack slots occupied by one type token (`V` is 0, `J`/`D` are 2).
pub fn type_slots(token: &str) -> usize {
    match token {
        "V" => 0,
        "J" | "D" => 2,
        _ => 1,
    }
}

/// Total operand stack slots of a method descriptor's parameters.
pub fn argument_slots(descriptor: &str) -> Result<usize, ClassFormatError> {
    let (params, _) = method_parts(descriptor)?;
    Ok(params.iter().map(|t| type_slots(t)).sum())
}

/// Operand stack slots of a method descriptor's return value.
pub fn return_slots(descriptor: &str) -> Result<usize, ClassFormatError> {
    let (_, ret) = method_parts(descriptor)?;
    Ok(type_slots(&ret))
}

/// The short display name of one type token: `Ljava/lang/String;` renders as
/// `String`, `[[I` as `int[][]`.
pub fn short_type_name(token: &str) -> String {
    let mut dimensions = 0;
    let mut rest = token;
    while let Some(stripped) = rest.strip_prefix('[') {
        dimensions += 1;
        rest = stripped;
    }
    let base = match rest {
        "B" => "byte",
        "C" => "char",
        "D" => "double",
        "F" => "float",
        "I" => "int",
        "J" => "long",
        "S" => "short",
        "Z" => "boolean",
        "V" => "void",
        other => other
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .map(|name| name.rsplit('/').next().unwrap_or(name))
            .unwrap_or(other),
    };
    let mut out = base.to_owned();
    for _ in 0..dimensions {
        out.push_str("[]");
    }
    out
}

/// Render a member reference in the dotted display form used by rule
/// violation messages: `java.lang.Class.getDeclaredMethod(String, Class[])`.
/// Constructors render as the bare class name:
/// `java.lang.ClassLoader(ClassLoader)`.
pub fn display_member(owner: &str, name: &str, descriptor: &str) -> String {
    let dotted_owner = owner.replace('/', ".");
    let args = match method_parts(descriptor) {
        Ok((params, _)) => params
            .iter()
            .map(|t| short_type_name(t))
            .collect::<Vec<_>>()
            .join(", "),
        // Field references display without an argument list.
        Err(_) => return format!("{dotted_owner}.{name}"),
    };
    if name == "<init>" {
        format!("{dotted_owner}({args})")
    } else {
        format!("{dotted_owner}.{name}({args})")
    }
}
