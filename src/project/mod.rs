//! Sketch project layout.
//!
//! ```text
//! <project>/
//!     build.properties    persisted BuildConfig
//!     src/                .pde sketches and plain .java files
//!     res/                Android resources
//!     data/               packaged as assets/ when present
//!     build/              generated manifest + sources, pipeline output
//! ```
//!
//! [`Project::prepare`] turns the project into a [`BuildConfig`] the pipeline
//! can run: it renders the manifest and the launcher activity from templates
//! and preprocesses every sketch into `build/src/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{self, BuildConfig, DEFAULT_APP_PACKAGE};
use crate::preprocess::{is_package_line, Preprocessor};
use crate::toolchain::Toolchain;

pub const PROPERTIES_FILE: &str = "build.properties";

const MANIFEST_TEMPLATE: &str = include_str!("../../templates/AndroidManifest.xml.in");
const ACTIVITY_TEMPLATE: &str = include_str!("../../templates/MainActivity.java.in");
const SKETCH_TEMPLATE: &str = include_str!("../../templates/main.pde.in");
const STRINGS_TEMPLATE: &str = include_str!("../../templates/strings.xml.in");

/// Sketch the launcher activity starts when the project has several.
const MAIN_SKETCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub root: PathBuf,
    pub properties_path: PathBuf,
    pub src_dir: PathBuf,
    pub res_dir: PathBuf,
    pub data_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl Project {
    fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            properties_path: root.join(PROPERTIES_FILE),
            src_dir: root.join("src"),
            res_dir: root.join("res"),
            data_dir: root.join("data"),
            build_dir: root.join("build"),
        }
    }

    /// Open an existing project.
    pub fn open(root: &Path) -> Result<Self> {
        let project = Self::at(root);
        if !project.properties_path.is_file() {
            bail!(
                "Not a sketch project (missing {}): {}",
                PROPERTIES_FILE,
                root.display()
            );
        }
        Ok(project)
    }

    /// Create `<parent>/<name>` with a starter sketch, a minimal resource
    /// tree and a default `build.properties`.
    pub fn create(parent: &Path, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) {
            bail!("Invalid project name: '{name}'");
        }
        let root = parent.join(name);
        if root.exists() {
            bail!("Project directory already exists: {}", root.display());
        }
        let project = Self::at(&root);
        for dir in [
            &project.root,
            &project.src_dir,
            &project.res_dir,
            &project.data_dir,
            &project.build_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory '{}'", dir.display()))?;
        }

        write_file(&project.src_dir.join(format!("{MAIN_SKETCH}.pde")), SKETCH_TEMPLATE)?;
        write_file(
            &project.res_dir.join("values/strings.xml"),
            &STRINGS_TEMPLATE.replace("%app_name%", &xml_escape(name)),
        )?;

        let config = BuildConfig {
            app_name: name.to_string(),
            app_package: package_for(name),
            build_path: PathBuf::from("build/output"),
            res_dir: PathBuf::from("res"),
            ..Default::default()
        };
        write_file(&project.properties_path, &config::to_properties(&config))?;
        info!(project = %root.display(), "created project");
        Ok(project)
    }

    /// The persisted config with relative paths anchored at the project root.
    pub fn load_config(&self) -> Result<BuildConfig> {
        let mut config = config::load_properties_file(&self.properties_path)?;
        let root = &self.root;
        for path in [
            &mut config.android_jar,
            &mut config.build_path,
            &mut config.manifest_path,
            &mut config.res_dir,
        ] {
            anchor(root, path);
        }
        for path in [
            &mut config.assets_dir,
            &mut config.native_libs_dir,
            &mut config.proguard_rules_path,
            &mut config.desugar_jdk_libs_path,
            &mut config.signing.keystore.path,
            &mut config.signing.key_with_cert.key_path,
            &mut config.signing.key_with_cert.cert_path,
        ]
        .into_iter()
        .flatten()
        {
            anchor(root, path);
        }
        for path in config.java_sources.iter_mut().chain(config.classpath.iter_mut()) {
            anchor(root, path);
        }
        Ok(config)
    }

    /// Generate the manifest and sources under `build/` and return the
    /// config to build with.
    pub fn prepare(&self, toolchain: &Toolchain) -> Result<BuildConfig> {
        let mut config = self.load_config()?;
        if config.build_path.as_os_str().is_empty() {
            config.build_path = self.build_dir.join("output");
        }
        if config.res_dir.as_os_str().is_empty() {
            config.res_dir = self.res_dir.clone();
        }
        if config.android_jar.as_os_str().is_empty() {
            config.android_jar = toolchain.android_jar();
        }
        let runtime = toolchain.runtime_jar();
        if runtime.is_file() && !config.classpath.contains(&runtime) {
            config.classpath.push(runtime);
        }
        if config.assets_dir.is_none() && has_entries(&self.data_dir) {
            config.assets_dir = Some(self.data_dir.clone());
        }

        fs::create_dir_all(&self.build_dir)
            .with_context(|| format!("creating directory '{}'", self.build_dir.display()))?;
        fs::create_dir_all(&config.build_path)
            .with_context(|| format!("creating directory '{}'", config.build_path.display()))?;
        let build_src = self.build_dir.join("src");
        if build_src.exists() {
            fs::remove_dir_all(&build_src)
                .with_context(|| format!("removing '{}'", build_src.display()))?;
        }

        let manifest = self.build_dir.join("AndroidManifest.xml");
        write_file(&manifest, &render_manifest(&config))?;
        config.manifest_path = manifest;

        let sketches = self.process_sources(&build_src, &config.app_package)?;
        let main = choose_main_sketch(&sketches)
            .with_context(|| format!("No .pde sketch found in {}", self.src_dir.display()))?;
        let activity = build_src
            .join(config.app_package.replace('.', "/"))
            .join("MainActivity.java");
        write_file(&activity, &render_activity(&config.app_package, &main))?;

        if !config.java_sources.contains(&build_src) {
            config.java_sources.insert(0, build_src);
        }
        Ok(config)
    }

    /// Preprocess `.pde` files and copy `.java` files into `out`, keeping
    /// relative paths. Returns the sketch class names.
    fn process_sources(&self, out: &Path, app_package: &str) -> Result<Vec<String>> {
        let preprocessor = Preprocessor::default();
        let mut sketches = Vec::new();
        if !self.src_dir.is_dir() {
            return Ok(sketches);
        }
        for entry in WalkDir::new(&self.src_dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking '{}'", self.src_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.src_dir)?;
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("pde") => {
                    let target = out.join(relative).with_extension("java");
                    let mut java = preprocessor.preprocess_file(path)?;
                    let source = fs::read_to_string(path)
                        .with_context(|| format!("reading '{}'", path.display()))?;
                    if !source.split('\n').any(is_package_line) {
                        java = format!("package {app_package};\n\n{java}");
                    }
                    write_file(&target, &java)?;
                    debug!(sketch = %relative.display(), "preprocessed sketch");
                    if let Some(stem) = path.file_stem() {
                        sketches.push(stem.to_string_lossy().into_owned());
                    }
                }
                Some("java") => {
                    let target = out.join(relative);
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(path, &target).with_context(|| {
                        format!("copying '{}' to '{}'", path.display(), target.display())
                    })?;
                    debug!(source = %relative.display(), "copied java source");
                }
                _ => {}
            }
        }
        Ok(sketches)
    }
}

/// Substitute the manifest placeholders. `%max_sdk%` is the target SDK.
pub fn render_manifest(config: &BuildConfig) -> String {
    let permissions: String = config
        .permissions
        .iter()
        .map(|name| format!("    <uses-permission android:name=\"{name}\"/>\n"))
        .collect();
    MANIFEST_TEMPLATE
        .replace("%permissions%", &permissions)
        .replace("%app_name%", &config.app_name)
        .replace("%package%", &config.app_package)
        .replace("%version_code%", &config.version_code.to_string())
        .replace("%version_name%", &config.version_name)
        .replace("%min_sdk%", &config.min_sdk.to_string())
        .replace("%target_sdk%", &config.target_sdk.to_string())
        .replace("%max_sdk%", &config.target_sdk.to_string())
}

pub fn render_activity(app_package: &str, sketch_class: &str) -> String {
    ACTIVITY_TEMPLATE
        .replace("%package%", app_package)
        .replace("%sketch%", sketch_class)
}

fn choose_main_sketch(sketches: &[String]) -> Option<String> {
    sketches
        .iter()
        .find(|name| *name == MAIN_SKETCH)
        .or_else(|| sketches.first())
        .cloned()
}

/// Application id derived from a project name, e.g. `My Sketch` becomes
/// `com.example.mysketch`.
fn package_for(name: &str) -> String {
    let segment: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match segment.chars().next() {
        Some(first) if first.is_ascii_alphabetic() => format!("com.example.{segment}"),
        _ => DEFAULT_APP_PACKAGE.to_string(),
    }
}

fn anchor(root: &Path, path: &mut PathBuf) {
    if !path.as_os_str().is_empty() && path.is_relative() {
        *path = root.join(&*path);
    }
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing '{}'", path.display()))
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            _ => out.push(ch),
        }
    }
    out
}
