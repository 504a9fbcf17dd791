//! Build configuration for one pipeline run.
//!
//! [`BuildConfig`] is constructed by the project layer (see [`crate::project`])
//! or loaded from a `build.properties` file, handed to the pipeline by value,
//! and never mutated while stages run. Paths derived from it live in
//! [`BuildLayout`].

pub mod properties;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use properties::{from_properties, load_properties_file, to_properties};

/// Default application package when a project does not declare one.
pub const DEFAULT_APP_PACKAGE: &str = "com.example.app";

/// Resource package id used by aapt2 for application resources.
pub const DEFAULT_PACKAGE_ID: u8 = 0x7f;

/// Errors raised while reading a persisted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for '{key}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("malformed line {line}: '{content}' (expected key=value)")]
    MalformedLine { line: usize, content: String },

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Keystore-based signing material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keystore {
    pub path: Option<PathBuf>,
    pub alias: Option<String>,
    pub store_password: Option<String>,
    pub key_password: Option<String>,
}

/// Raw PKCS#8 key plus X.509 certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyWithCert {
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
}

/// Signing descriptor. Both variants are kept so a persisted config
/// round-trips even when only one of them is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningConfig {
    pub use_keystore: bool,
    pub keystore: Keystore,
    pub key_with_cert: KeyWithCert,
}

/// Signing material resolved from a [`SigningConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningMaterial<'a> {
    Keystore {
        path: &'a Path,
        alias: &'a str,
        store_password: &'a str,
        key_password: Option<&'a str>,
    },
    KeyWithCert {
        key: &'a Path,
        cert: &'a Path,
    },
}

impl SigningConfig {
    /// Resolve the active signing variant.
    ///
    /// Returns `None` when the selected variant is missing a required field.
    pub fn material(&self) -> Option<SigningMaterial<'_>> {
        if self.use_keystore {
            let ks = &self.keystore;
            Some(SigningMaterial::Keystore {
                path: ks.path.as_deref()?,
                alias: ks.alias.as_deref()?,
                store_password: ks.store_password.as_deref()?,
                key_password: ks.key_password.as_deref(),
            })
        } else {
            let kc = &self.key_with_cert;
            Some(SigningMaterial::KeyWithCert {
                key: kc.key_path.as_deref()?,
                cert: kc.cert_path.as_deref()?,
            })
        }
    }
}

/// Everything one build run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub app_name: String,
    pub app_package: String,
    pub package_id: u8,
    pub version_name: String,
    pub version_code: u32,
    pub min_sdk: u32,
    pub target_sdk: u32,
    /// Java source/target level passed to javac.
    pub java_version: String,

    /// SDK platform archive (`android.jar`).
    pub android_jar: PathBuf,
    pub build_path: PathBuf,
    pub manifest_path: PathBuf,
    pub res_dir: PathBuf,
    pub assets_dir: Option<PathBuf>,
    pub native_libs_dir: Option<PathBuf>,
    pub proguard_rules_path: Option<PathBuf>,
    pub desugar_jdk_libs_path: Option<PathBuf>,

    pub java_sources: Vec<PathBuf>,
    /// Dependency jars compiled against and dexed alongside the app classes.
    pub classpath: Vec<PathBuf>,
    pub permissions: Vec<String>,
    pub signing: SigningConfig,

    pub debug_mode: bool,
    pub shrink_enabled: bool,
    pub align_enabled: bool,
    pub sign_enabled: bool,
    pub optimize_enabled: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            app_name: "Sketch App".to_string(),
            app_package: DEFAULT_APP_PACKAGE.to_string(),
            package_id: DEFAULT_PACKAGE_ID,
            version_name: "1.0".to_string(),
            version_code: 1,
            min_sdk: 21,
            target_sdk: 33,
            java_version: "17".to_string(),
            android_jar: PathBuf::new(),
            build_path: PathBuf::new(),
            manifest_path: PathBuf::new(),
            res_dir: PathBuf::new(),
            assets_dir: None,
            native_libs_dir: None,
            proguard_rules_path: None,
            desugar_jdk_libs_path: None,
            java_sources: Vec::new(),
            classpath: Vec::new(),
            permissions: Vec::new(),
            signing: SigningConfig::default(),
            debug_mode: true,
            shrink_enabled: false,
            align_enabled: true,
            sign_enabled: true,
            optimize_enabled: true,
        }
    }
}

impl BuildConfig {
    /// Intermediate and output locations for this config.
    pub fn layout(&self) -> BuildLayout {
        BuildLayout::new(&self.build_path, &self.app_package)
    }
}

/// Derived locations under the build directory.
///
/// Each stage owns the directories it writes; later stages only read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub root: PathBuf,
    pub compiled_res_dir: PathBuf,
    pub compiled_res: PathBuf,
    pub gen_dir: PathBuf,
    pub base_archive: PathBuf,
    pub aapt_rules: PathBuf,
    pub classes_dir: PathBuf,
    /// Argument file listing every source handed to javac.
    pub javac_args: PathBuf,
    /// Compiled classes bundled for the dexer.
    pub classes_jar: PathBuf,
    pub dex_dir: PathBuf,
    pub package_dir: PathBuf,
    pub optimized_dir: PathBuf,
    pub aligned_dir: PathBuf,
    pub signing_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub report: PathBuf,
    /// File name shared by every package the pipeline produces.
    pub package_file_name: String,
}

impl BuildLayout {
    pub fn new(build_path: &Path, app_package: &str) -> Self {
        let root = build_path.to_path_buf();
        let gen_dir = root.join("gen");
        let compiled_res_dir = root.join("compiled_res");
        Self {
            compiled_res: compiled_res_dir.join("resources.zip"),
            compiled_res_dir,
            base_archive: gen_dir.join("resources.ap_"),
            aapt_rules: gen_dir.join("aapt-rules.txt"),
            gen_dir,
            classes_dir: root.join("classes"),
            javac_args: root.join("javac-sources.txt"),
            classes_jar: root.join("classes.jar"),
            dex_dir: root.join("dex"),
            package_dir: root.join("package"),
            optimized_dir: root.join("optimized"),
            aligned_dir: root.join("aligned"),
            signing_dir: root.join("signing"),
            outputs_dir: root.join("outputs"),
            report: root.join("build-report.json"),
            package_file_name: format!("{app_package}.apk"),
            root,
        }
    }

    /// Directories removed by the clean stage.
    pub fn intermediate_dirs(&self) -> [&Path; 9] {
        [
            &self.compiled_res_dir,
            &self.gen_dir,
            &self.classes_dir,
            &self.dex_dir,
            &self.package_dir,
            &self.optimized_dir,
            &self.aligned_dir,
            &self.signing_dir,
            &self.outputs_dir,
        ]
    }

    pub fn unsigned_package(&self) -> PathBuf {
        self.package_dir.join(&self.package_file_name)
    }

    pub fn optimized_package(&self) -> PathBuf {
        self.optimized_dir.join(&self.package_file_name)
    }

    pub fn aligned_package(&self) -> PathBuf {
        self.aligned_dir.join(&self.package_file_name)
    }

    pub fn signed_package(&self) -> PathBuf {
        self.outputs_dir.join(&self.package_file_name)
    }
}
