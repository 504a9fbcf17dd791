//! Flat `key=value` persistence for [`BuildConfig`].
//!
//! One entry per line, `#`/`!` comments, camelCase keys. Booleans are
//! `true`/`false`, lists are comma separated (a literal comma inside an item
//! is written `\,`), the signing descriptor is flattened into top-level keys.
//! An optional string that is present but empty (`keyPassword=`) stays
//! `Some("")`. Unknown keys are ignored so project files
//! can carry extra properties (e.g. editor state) next to the build config.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{BuildConfig, ConfigError};

/// Parse `key=value` text into an ordered map.
pub fn parse(text: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut map = BTreeMap::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = split_entry(line) else {
            return Err(ConfigError::MalformedLine {
                line: index + 1,
                content: raw.to_string(),
            });
        };
        map.insert(unescape(key.trim()), unescape(value.trim_start()));
    }
    Ok(map)
}

/// Split on the first unescaped `=`.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '=' if !escaped => return Some((&line[..idx], &line[idx + 1..])),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (idx, ch) in raw.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if idx == 0 => out.push_str("\\ "),
            _ => out.push(ch),
        }
    }
    out
}

/// Serialize a config, one key per line, in a stable order.
pub fn to_properties(config: &BuildConfig) -> String {
    let mut out = String::from("# Build config\n");
    let mut put = |key: &str, value: &str| {
        out.push_str(key);
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    };

    put("appName", &config.app_name);
    put("appPackage", &config.app_package);
    put("packageId", &format!("0x{:02x}", config.package_id));
    put("versionName", &config.version_name);
    put("versionCode", &config.version_code.to_string());
    put("minSdk", &config.min_sdk.to_string());
    put("targetSdk", &config.target_sdk.to_string());
    put("javaVersion", &config.java_version);

    put("androidJarPath", &path_str(&config.android_jar));
    put("buildPath", &path_str(&config.build_path));
    put("manifestPath", &path_str(&config.manifest_path));
    put("resDir", &path_str(&config.res_dir));
    for (key, value) in [
        ("assetsDir", &config.assets_dir),
        ("nativeLibsDir", &config.native_libs_dir),
        ("proguardRulesPath", &config.proguard_rules_path),
        ("desugarJdkLibsPath", &config.desugar_jdk_libs_path),
    ] {
        if let Some(path) = value {
            put(key, &path_str(path));
        }
    }

    put("javaSources", &join_paths(&config.java_sources));
    put("classpath", &join_paths(&config.classpath));
    put("permissions", &join_list(config.permissions.iter().map(String::as_str)));

    put("debugMode", bool_str(config.debug_mode));
    put("r8enabled", bool_str(config.shrink_enabled));
    put("apkAlignEnable", bool_str(config.align_enabled));
    put("apkSignEnable", bool_str(config.sign_enabled));
    put("aapt2OptimizeEnable", bool_str(config.optimize_enabled));

    let signing = &config.signing;
    put("useKeystore", bool_str(signing.use_keystore));
    if let Some(path) = &signing.keystore.path {
        put("keystorePath", &path_str(path));
    }
    for (key, value) in [
        ("keyAlias", &signing.keystore.alias),
        ("storePassword", &signing.keystore.store_password),
        ("keyPassword", &signing.keystore.key_password),
    ] {
        if let Some(value) = value {
            put(key, value);
        }
    }
    for (key, value) in [
        ("keyPath", &signing.key_with_cert.key_path),
        ("certPath", &signing.key_with_cert.cert_path),
    ] {
        if let Some(path) = value {
            put(key, &path_str(path));
        }
    }

    out
}

/// Build a config from parsed properties. Missing keys keep their defaults.
pub fn from_properties(props: &BTreeMap<String, String>) -> Result<BuildConfig, ConfigError> {
    let mut config = BuildConfig::default();
    let get = |key: &str| props.get(key).map(String::as_str);

    if let Some(v) = get("appName") {
        config.app_name = v.to_string();
    }
    if let Some(v) = get("appPackage") {
        config.app_package = v.to_string();
    }
    if let Some(v) = get("packageId") {
        config.package_id = parse_package_id(v)?;
    }
    if let Some(v) = get("versionName") {
        config.version_name = v.to_string();
    }
    if let Some(v) = get("versionCode") {
        config.version_code = parse_number("versionCode", v)?;
    }
    if let Some(v) = get("minSdk") {
        config.min_sdk = parse_number("minSdk", v)?;
    }
    if let Some(v) = get("targetSdk") {
        config.target_sdk = parse_number("targetSdk", v)?;
    }
    if let Some(v) = get("javaVersion") {
        config.java_version = v.to_string();
    }

    if let Some(v) = get("androidJarPath") {
        config.android_jar = PathBuf::from(v);
    }
    if let Some(v) = get("buildPath") {
        config.build_path = PathBuf::from(v);
    }
    if let Some(v) = get("manifestPath") {
        config.manifest_path = PathBuf::from(v);
    }
    if let Some(v) = get("resDir") {
        config.res_dir = PathBuf::from(v);
    }
    config.assets_dir = optional_path(get("assetsDir"));
    config.native_libs_dir = optional_path(get("nativeLibsDir"));
    config.proguard_rules_path = optional_path(get("proguardRulesPath"));
    config.desugar_jdk_libs_path = optional_path(get("desugarJdkLibsPath"));

    if let Some(v) = get("javaSources") {
        config.java_sources = split_list(v).into_iter().map(PathBuf::from).collect();
    }
    if let Some(v) = get("classpath") {
        config.classpath = split_list(v).into_iter().map(PathBuf::from).collect();
    }
    if let Some(v) = get("permissions") {
        config.permissions = split_list(v);
    }

    for (key, slot) in [
        ("debugMode", &mut config.debug_mode),
        ("r8enabled", &mut config.shrink_enabled),
        ("apkAlignEnable", &mut config.align_enabled),
        ("apkSignEnable", &mut config.sign_enabled),
        ("aapt2OptimizeEnable", &mut config.optimize_enabled),
        ("useKeystore", &mut config.signing.use_keystore),
    ] {
        if let Some(v) = get(key) {
            *slot = parse_bool(key, v)?;
        }
    }

    let signing = &mut config.signing;
    signing.keystore.path = optional_path(get("keystorePath"));
    signing.keystore.alias = optional_string(get("keyAlias"));
    signing.keystore.store_password = optional_string(get("storePassword"));
    signing.keystore.key_password = optional_string(get("keyPassword"));
    signing.key_with_cert.key_path = optional_path(get("keyPath"));
    signing.key_with_cert.cert_path = optional_path(get("certPath"));

    Ok(config)
}

/// Read a `build.properties` file into a config.
pub fn load_properties_file(path: &Path) -> Result<BuildConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_properties(&parse(&text)?)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: other.to_string(),
            expected: "'true' or 'false'",
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "an unsigned integer",
        })
}

fn parse_package_id(value: &str) -> Result<u8, ConfigError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|_| ConfigError::InvalidValue {
        key: "packageId".to_string(),
        value: value.to_string(),
        expected: "a byte such as 0x7f",
    })
}

fn optional_string(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn optional_path(value: Option<&str>) -> Option<PathBuf> {
    value.filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Split on unescaped commas; `\,` and `\\` inside an item are literal.
fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => current.extend(chars.next()),
            ',' => items.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn join_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .map(|item| item.replace('\\', "\\\\").replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(",")
}

fn join_paths(paths: &[PathBuf]) -> String {
    let items: Vec<String> = paths.iter().map(|p| path_str(p)).collect();
    join_list(items.iter().map(String::as_str))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
