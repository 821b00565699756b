use anyhow::anyhow;
use anyhow::Result;

/// A single ABI-level value kind. Every value crossing the ABI boundary
/// is one of these four; richer types are lowered by the generated
/// bindings module, never by this runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreType {
    I32,
    I64,
    F32,
    F64,
}

impl CoreType {
    /// Width in bytes when packed into a flat argument buffer.
    pub fn word_size(self) -> usize {
        match self {
            CoreType::I32 | CoreType::F32 => 4,
            CoreType::I64 | CoreType::F64 => 8,
        }
    }
}

/// The flattened ABI shape of one export or import.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub params: Vec<CoreType>,
    pub ret: Option<CoreType>,
    pub paramptr: bool,
    pub retptr: bool,
    pub retsize: u32,
}

/// Parses the `ARGS` grammar: an optional leading `*` (sets `paramptr`),
/// followed by a comma-separated list of `i32|i64|f32|f64` (may be empty).
pub fn parse_args(raw: &str) -> Result<(Vec<CoreType>, bool)> {
    let (paramptr, rest) = match raw.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    if rest.is_empty() {
        return Ok((Vec::new(), paramptr));
    }

    let mut params = Vec::new();
    for token in rest.split(',') {
        params.push(parse_core_type(token)?);
    }

    Ok((params, paramptr))
}

/// Parses the `RET` grammar: an optional leading `*` (sets `retptr`),
/// followed by either nothing (retptr's own return is passed by pointer
/// and carries no flat scalar; a plain empty string means no return at
/// all) or exactly one `i32|i64|f32|f64`.
pub fn parse_ret(raw: &str) -> Result<(Option<CoreType>, bool)> {
    let (retptr, rest) = match raw.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    if rest.is_empty() {
        return Ok((None, retptr));
    }

    Ok((Some(parse_core_type(rest)?), retptr))
}

fn parse_core_type(token: &str) -> Result<CoreType> {
    match token {
        "i32" => Ok(CoreType::I32),
        "i64" => Ok(CoreType::I64),
        "f32" => Ok(CoreType::F32),
        "f64" => Ok(CoreType::F64),
        other => Err(anyhow!("TypeParse: unknown core type token '{other}'")),
    }
}

impl Signature {
    /// Builds a signature from the raw `ARGS`/`RET`/`RETSIZE` strings,
    /// enforcing the invariants from the grammar (exactly one paramptr
    /// arg, retptr implies an extra trailing i32 param at call time).
    pub fn parse(args: &str, ret: &str, retsize: u32) -> Result<Signature> {
        let (params, paramptr) = parse_args(args)?;
        let (ret, retptr) = parse_ret(ret)?;

        if paramptr && params.len() != 1 {
            return Err(anyhow!(
                "TypeParse: paramptr signatures must declare exactly one parameter"
            ));
        }

        Ok(Signature {
            params,
            ret,
            paramptr,
            retptr,
            retsize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_args() {
        let (params, paramptr) = parse_args("i32,i64,f32,f64").unwrap();
        assert!(!paramptr);
        assert_eq!(
            params,
            vec![CoreType::I32, CoreType::I64, CoreType::F32, CoreType::F64]
        );
    }

    #[test]
    fn parses_paramptr() {
        let (params, paramptr) = parse_args("*i32").unwrap();
        assert!(paramptr);
        assert_eq!(params, vec![CoreType::I32]);
    }

    #[test]
    fn parses_empty_ret() {
        let (ret, retptr) = parse_ret("").unwrap();
        assert_eq!(ret, None);
        assert!(!retptr);
    }

    #[test]
    fn parses_retptr() {
        let (ret, retptr) = parse_ret("*").unwrap();
        assert_eq!(ret, None);
        assert!(retptr);
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(parse_args("bogus").is_err());
        assert!(parse_ret("bogus").is_err());
    }

    #[test]
    fn paramptr_requires_single_param() {
        assert!(Signature::parse("*i32,i32", "", 0).is_err());
        assert!(Signature::parse("*i32", "i32", 4).is_ok());
    }
}
