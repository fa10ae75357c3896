//! Maps IMPORT and CALL names to module files on disk.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bytecode::format_error::LoadError;
use crate::bytecode::module::Module;
use crate::runtime::config::VmConfig;

pub struct ModuleLoader<'a> {
    config: &'a VmConfig,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(config: &'a VmConfig) -> Self {
        Self { config }
    }

    /// `module_root/name`, falling back to `module_root/name.<ext>` when the
    /// name carries no extension. `None` when neither exists.
    pub fn import_path(&self, name: &str) -> Option<PathBuf> {
        let direct = self.config.module_root.join(name);
        if direct.is_file() {
            return Some(direct);
        }

        if Path::new(name).extension().is_none() {
            let with_ext = self
                .config
                .module_root
                .join(format!("{}.{}", name, self.config.function_extension));
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        None
    }

    /// Loads an imported module. A missing file yields an empty module; a
    /// present file that does not load is an error.
    pub fn load_import(&self, name: &str) -> Result<Module, LoadError> {
        match self.import_path(name) {
            Some(path) => {
                debug!(module = name, path = %path.display(), "loading import");
                Module::from_file(&path)
            }
            None => {
                debug!(module = name, "import not found, using empty module");
                Ok(Module::empty())
            }
        }
    }

    /// `function_root/name.<ext>`.
    pub fn function_path(&self, name: &str) -> PathBuf {
        self.config
            .function_root
            .join(format!("{}.{}", name, self.config.function_extension))
    }

    /// Loads the module implementing an external call, if one exists.
    pub fn load_function(&self, name: &str) -> Result<Option<Module>, LoadError> {
        let path = self.function_path(name);
        if !path.is_file() {
            debug!(function = name, path = %path.display(), "no function file");
            return Ok(None);
        }
        debug!(function = name, path = %path.display(), "loading function");
        Module::from_file(&path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::NATIVE_MAGIC;
    use std::fs;

    fn native(code: &[u8]) -> Vec<u8> {
        let mut bytes = NATIVE_MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(code);
        bytes
    }

    fn config_in(dir: &Path) -> VmConfig {
        VmConfig {
            module_root: dir.to_path_buf(),
            function_root: dir.join("colib"),
            ..VmConfig::default()
        }
    }

    #[test]
    fn test_import_exact_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("port.col"), native(&[0xFF])).unwrap();
        let config = config_in(dir.path());
        let module = ModuleLoader::new(&config).load_import("port.col").unwrap();
        assert_eq!(module.code(), &[0xFF]);
    }

    #[test]
    fn test_import_adds_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("port.col"), native(&[0x1F])).unwrap();
        let config = config_in(dir.path());
        let loader = ModuleLoader::new(&config);
        assert_eq!(loader.import_path("port"), Some(dir.path().join("port.col")));
        assert_eq!(loader.load_import("port").unwrap().code(), &[0x1F]);
    }

    #[test]
    fn test_missing_import_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let module = ModuleLoader::new(&config).load_import("nothing.col").unwrap();
        assert!(module.is_empty());
    }

    #[test]
    fn test_corrupt_import_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.col"), [0xFA, 0xAC, 0xBE, 0xED]).unwrap();
        let config = config_in(dir.path());
        let err = ModuleLoader::new(&config).load_import("bad.col").unwrap_err();
        assert!(matches!(err, LoadError::UnknownMagic(0xFAACBEED)));
    }

    #[test]
    fn test_function_lookup() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("colib")).unwrap();
        fs::write(dir.path().join("colib/greet.col"), native(&[0x0A])).unwrap();
        let config = config_in(dir.path());
        let loader = ModuleLoader::new(&config);

        assert_eq!(
            loader.function_path("greet"),
            dir.path().join("colib").join("greet.col")
        );
        assert_eq!(loader.load_function("greet").unwrap().unwrap().code(), &[0x0A]);
        assert!(loader.load_function("absent").unwrap().is_none());
    }
}
