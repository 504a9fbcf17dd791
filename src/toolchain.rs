//! Toolchain binary and runtime library resolution.
//!
//! Resolution order per tool:
//! 1. `APK_BUILDER_<TOOL>` env var (path to binary)
//! 2. `[tools]` table of `<home>/toolchain.toml`
//! 3. `<home>/bin/<tool>`
//! 4. System PATH (`which <tool>`)
//!
//! A tool that is found nowhere resolves to `<home>/bin/<tool>`; preflight
//! then reports every missing tool in one error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::pipeline::paths::resolve_relative;

/// Toolchain description file inside the toolchain home.
pub const TOOLCHAIN_FILE: &str = "toolchain.toml";

/// SDK platform archive expected in the toolchain home.
pub const ANDROID_JAR: &str = "android.jar";

/// Sketch runtime library expected in the toolchain home.
pub const RUNTIME_JAR: &str = "processing-core.jar";

/// External tools used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Aapt2,
    Javac,
    D8,
    R8,
    Zipalign,
    Apksigner,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::Aapt2,
        Tool::Javac,
        Tool::D8,
        Tool::R8,
        Tool::Zipalign,
        Tool::Apksigner,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Aapt2 => "aapt2",
            Tool::Javac => "javac",
            Tool::D8 => "d8",
            Tool::R8 => "r8",
            Tool::Zipalign => "zipalign",
            Tool::Apksigner => "apksigner",
        }
    }

    fn env_var(self) -> String {
        format!("APK_BUILDER_{}", self.name().to_ascii_uppercase())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainToml {
    #[serde(default)]
    tools: ToolsToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolsToml {
    aapt2: Option<String>,
    javac: Option<String>,
    d8: Option<String>,
    r8: Option<String>,
    zipalign: Option<String>,
    apksigner: Option<String>,
}

impl ToolsToml {
    fn get(&self, tool: Tool) -> Option<&str> {
        match tool {
            Tool::Aapt2 => self.aapt2.as_deref(),
            Tool::Javac => self.javac.as_deref(),
            Tool::D8 => self.d8.as_deref(),
            Tool::R8 => self.r8.as_deref(),
            Tool::Zipalign => self.zipalign.as_deref(),
            Tool::Apksigner => self.apksigner.as_deref(),
        }
    }
}

/// Resolved locations of every tool plus the toolchain home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Directory holding runtime libraries, `toolchain.toml` and the
    /// key-copy lock.
    pub home: PathBuf,
    pub aapt2: PathBuf,
    pub javac: PathBuf,
    pub d8: PathBuf,
    pub r8: PathBuf,
    pub zipalign: PathBuf,
    pub apksigner: PathBuf,
}

impl Toolchain {
    /// Default toolchain home (`<data dir>/apk-builder`).
    pub fn default_home() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("apk-builder"))
    }

    /// Resolve every tool for the toolchain rooted at `home`.
    pub fn resolve(home: &Path) -> Result<Self> {
        let config_path = home.join(TOOLCHAIN_FILE);
        let config = if config_path.is_file() {
            let text = fs::read_to_string(&config_path)
                .with_context(|| format!("reading toolchain config '{}'", config_path.display()))?;
            toml::from_str::<ToolchainToml>(&text)
                .with_context(|| format!("parsing toolchain config '{}'", config_path.display()))?
        } else {
            ToolchainToml::default()
        };

        let locate = |tool: Tool| locate_tool(home, &config.tools, tool);
        Ok(Self {
            home: home.to_path_buf(),
            aapt2: locate(Tool::Aapt2),
            javac: locate(Tool::Javac),
            d8: locate(Tool::D8),
            r8: locate(Tool::R8),
            zipalign: locate(Tool::Zipalign),
            apksigner: locate(Tool::Apksigner),
        })
    }

    /// Toolchain whose binaries all live in `bin_dir`.
    pub fn from_dir(home: &Path, bin_dir: &Path) -> Self {
        let bin = |tool: Tool| bin_dir.join(tool.name());
        Self {
            home: home.to_path_buf(),
            aapt2: bin(Tool::Aapt2),
            javac: bin(Tool::Javac),
            d8: bin(Tool::D8),
            r8: bin(Tool::R8),
            zipalign: bin(Tool::Zipalign),
            apksigner: bin(Tool::Apksigner),
        }
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Aapt2 => &self.aapt2,
            Tool::Javac => &self.javac,
            Tool::D8 => &self.d8,
            Tool::R8 => &self.r8,
            Tool::Zipalign => &self.zipalign,
            Tool::Apksigner => &self.apksigner,
        }
    }

    pub fn android_jar(&self) -> PathBuf {
        self.home.join(ANDROID_JAR)
    }

    pub fn runtime_jar(&self) -> PathBuf {
        self.home.join(RUNTIME_JAR)
    }

    /// Lock file serialising signing-key copies across builders.
    pub fn key_lock_path(&self) -> PathBuf {
        self.home.join(".signing.lock")
    }
}

fn locate_tool(home: &Path, tools: &ToolsToml, tool: Tool) -> PathBuf {
    if let Ok(path) = env::var(tool.env_var()) {
        debug!(tool = tool.name(), path = %path, "tool from environment");
        return PathBuf::from(path);
    }
    if let Some(path) = tools.get(tool) {
        return resolve_relative(home, path);
    }
    let bundled = home.join("bin").join(tool.name());
    if bundled.is_file() {
        return bundled;
    }
    if let Ok(path) = which::which(tool.name()) {
        return path;
    }
    bundled
}
