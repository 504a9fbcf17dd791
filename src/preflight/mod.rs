//! Preflight checks run before the first stage.
//!
//! Validates the configured paths, the presence of every tool the enabled
//! stages need, and marks tool binaries executable. Any problem here is an
//! environment error: no stage runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use apk_builder::preflight::validate_environment;
//!
//! validate_environment(&config, &toolchain)?;
//! ```

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::config::{BuildConfig, SigningMaterial};
use crate::toolchain::{Tool, Toolchain};

/// Check if a tool binary exists at its resolved location.
pub fn tool_exists(toolchain: &Toolchain, tool: Tool) -> bool {
    toolchain.path(tool).is_file()
}

/// Tools needed by the stages `config` enables.
pub fn required_tools(config: &BuildConfig) -> Vec<Tool> {
    let mut tools = vec![Tool::Aapt2, Tool::Javac];
    tools.push(if config.shrink_enabled { Tool::R8 } else { Tool::D8 });
    if config.align_enabled {
        tools.push(Tool::Zipalign);
    }
    if config.sign_enabled {
        tools.push(Tool::Apksigner);
    }
    tools
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with the list of missing tools and where they were expected
pub fn check_required_tools(toolchain: &Toolchain, tools: &[Tool]) -> Result<()> {
    let missing: Vec<Tool> = tools
        .iter()
        .copied()
        .filter(|tool| !tool_exists(toolchain, *tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|tool| format!("  {} (expected at {})", tool.name(), toolchain.path(*tool).display()))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required toolchain binaries:\n{}", msg);
    }

    Ok(())
}

/// Set the execute bits on a tool binary if none are set.
///
/// Bundled tools are often unpacked without them.
#[cfg(unix)]
pub fn ensure_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = fs::metadata(path)
        .with_context(|| format!("reading metadata of '{}'", path.display()))?;
    let mut perms = meta.permissions();
    if perms.mode() & 0o111 != 0 {
        return Ok(());
    }
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
        .with_context(|| format!("making '{}' executable", path.display()))
}

#[cfg(not(unix))]
pub fn ensure_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Validate every prerequisite of a build run.
pub fn validate_environment(config: &BuildConfig, toolchain: &Toolchain) -> Result<()> {
    validate_directory(&config.build_path, "Build directory")?;
    validate_directory(&config.res_dir, "Resources directory")?;
    if let Some(dir) = &config.assets_dir {
        validate_directory(dir, "Assets directory")?;
    }
    if let Some(dir) = &config.native_libs_dir {
        validate_directory(dir, "Native libs directory")?;
    }
    validate_file(&config.android_jar, "android.jar")?;
    validate_file(&config.manifest_path, "AndroidManifest.xml")?;

    if config.java_sources.is_empty() {
        bail!("No Java sources specified");
    }
    for source in &config.java_sources {
        validate_directory(source, "Java source directory")?;
    }
    for jar in &config.classpath {
        validate_file(jar, "Classpath library")?;
    }
    if let Some(lib) = &config.desugar_jdk_libs_path {
        validate_file(lib, "Desugared JDK library")?;
    }
    if config.shrink_enabled {
        if let Some(rules) = &config.proguard_rules_path {
            validate_file(rules, "ProGuard rules")?;
        }
    }
    if config.sign_enabled {
        validate_signing(config)?;
    }

    let tools = required_tools(config);
    check_required_tools(toolchain, &tools)?;
    for tool in tools {
        ensure_executable(toolchain.path(tool))?;
    }

    Ok(())
}

fn validate_signing(config: &BuildConfig) -> Result<()> {
    match config.signing.material() {
        Some(SigningMaterial::Keystore { path, .. }) => validate_file(path, "Keystore"),
        Some(SigningMaterial::KeyWithCert { key, cert }) => {
            validate_file(key, "Signing key")?;
            validate_file(cert, "Signing certificate")
        }
        None if config.signing.use_keystore => {
            bail!("Signing enabled but keystore path, alias or store password is not set")
        }
        None => bail!("Signing enabled but key or certificate path is not set"),
    }
}

fn validate_directory(path: &Path, description: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("{} path is not set", description);
    }
    if !path.exists() {
        bail!("{} does not exist: {}", description, path.display());
    }
    if !path.is_dir() {
        bail!("{} is not a directory: {}", description, path.display());
    }
    Ok(())
}

fn validate_file(path: &Path, description: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("{} path is not set", description);
    }
    if !path.is_file() {
        bail!("{} not found at: {}", description, path.display());
    }
    Ok(())
}
