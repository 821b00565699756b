use crate::errors::CustomError;
use crate::signature::Signature;
use anyhow::anyhow;
use anyhow::Result;
use std::env;

/// Abstracts the flat keyed string environment so unit tests can supply
/// a fixed map instead of touching the real process environment.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The production configuration source: the process environment.
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

/// One declared import wrapper module.
#[derive(Debug, Clone)]
pub struct ImportWrapperConfig {
    pub name: String,
    pub len: usize,
}

/// One declared flat import.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub name: String,
    pub argcnt: u32,
}

/// One declared export binding.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub name: String,
    pub signature: Signature,
}

/// The fully decoded initialization configuration (C1's output).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub debug: bool,
    pub source_name: String,
    pub source_len: usize,
    pub bindings_len: usize,
    pub import_wrappers: Vec<ImportWrapperConfig>,
    pub exports: Vec<ExportConfig>,
    pub imports: Vec<ImportConfig>,
}

fn required(source: &dyn ConfigSource, key: &str) -> Result<String> {
    source
        .get(key)
        .ok_or_else(|| CustomError::generic(format!("missing required configuration key '{key}'")))
}

fn required_usize(source: &dyn ConfigSource, key: &str) -> Result<usize> {
    let raw = required(source, key)?;
    raw.parse::<usize>()
        .map_err(|_| anyhow!("configuration key '{key}' is not a valid integer: '{raw}'"))
}

fn required_u32(source: &dyn ConfigSource, key: &str) -> Result<u32> {
    let raw = required(source, key)?;
    raw.parse::<u32>()
        .map_err(|_| anyhow!("configuration key '{key}' is not a valid integer: '{raw}'"))
}

impl RuntimeConfig {
    /// Reads and validates the full configuration surface from `source`.
    pub fn read(source: &dyn ConfigSource) -> Result<RuntimeConfig> {
        let debug = source.get("DEBUG").as_deref() == Some("1");
        let source_name = required(source, "SOURCE_NAME")?;
        let source_len = required_usize(source, "SOURCE_LEN")?;
        let bindings_len = required_usize(source, "BINDINGS_LEN")?;

        let import_wrapper_cnt = required_usize(source, "IMPORT_WRAPPER_CNT")?;
        let mut import_wrappers = Vec::with_capacity(import_wrapper_cnt);
        for i in 0..import_wrapper_cnt {
            let name = required(source, &format!("IMPORT_WRAPPER{i}_NAME"))?;
            let len = required_usize(source, &format!("IMPORT_WRAPPER{i}_LEN"))?;
            import_wrappers.push(ImportWrapperConfig { name, len });
        }

        let export_cnt = required_usize(source, "EXPORT_CNT")?;
        let mut exports = Vec::with_capacity(export_cnt);
        for i in 0..export_cnt {
            let name = required(source, &format!("EXPORT{i}_NAME"))?;
            let args = source.get(&format!("EXPORT{i}_ARGS")).unwrap_or_default();
            let ret = source.get(&format!("EXPORT{i}_RET")).unwrap_or_default();
            let retsize = required_u32(source, &format!("EXPORT{i}_RETSIZE"))?;
            let signature = Signature::parse(&args, &ret, retsize)?;
            exports.push(ExportConfig { name, signature });
        }

        let import_cnt = required_usize(source, "IMPORT_CNT")?;
        let mut imports = Vec::with_capacity(import_cnt);
        for i in 0..import_cnt {
            let name = required(source, &format!("IMPORT{i}_NAME"))?;
            let argcnt = required_u32(source, &format!("IMPORT{i}_ARGCNT"))?;
            imports.push(ImportConfig { name, argcnt });
        }

        Ok(RuntimeConfig {
            debug,
            source_name,
            source_len,
            bindings_len,
            import_wrappers,
            exports,
            imports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapSource(HashMap<&'static str, &'static str>);

    impl ConfigSource for MapSource {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    fn base_config() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DEBUG", "0"),
            ("SOURCE_NAME", "user.js"),
            ("SOURCE_LEN", "10"),
            ("BINDINGS_LEN", "20"),
            ("IMPORT_WRAPPER_CNT", "0"),
            ("EXPORT_CNT", "1"),
            ("EXPORT0_NAME", "id"),
            ("EXPORT0_ARGS", "i32"),
            ("EXPORT0_RET", "i32"),
            ("EXPORT0_RETSIZE", "4"),
            ("IMPORT_CNT", "0"),
        ])
    }

    #[test]
    fn reads_a_complete_config() {
        let source = MapSource(base_config());
        let config = RuntimeConfig::read(&source).unwrap();
        assert_eq!(config.source_name, "user.js");
        assert_eq!(config.exports.len(), 1);
        assert_eq!(config.exports[0].name, "id");
        assert!(!config.debug);
    }

    #[test]
    fn missing_key_fails() {
        let mut raw = base_config();
        raw.remove("SOURCE_NAME");
        let source = MapSource(raw);
        assert!(RuntimeConfig::read(&source).is_err());
    }

    #[test]
    fn malformed_signature_fails() {
        let mut raw = base_config();
        raw.insert("EXPORT0_ARGS", "bogus");
        let source = MapSource(raw);
        assert!(RuntimeConfig::read(&source).is_err());
    }

    #[test]
    fn debug_flag_parses_one() {
        let mut raw = base_config();
        raw.insert("DEBUG", "1");
        let source = MapSource(raw);
        assert!(RuntimeConfig::read(&source).unwrap().debug);
    }
}
