use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::{collect_files, prepare_output, Stage, StageContext};
use crate::process::{ensure_exists, Cmd};

/// Compiles the project sources and the generated `R.java` with javac.
///
/// Sources are passed through an `@argfile` so long projects never hit the
/// command-line length limit.
pub struct CompileSources;

impl Stage for CompileSources {
    fn name(&self) -> &'static str {
        "compile-sources"
    }

    fn label(&self) -> &'static str {
        "Compiling Java sources..."
    }

    fn progress(&self) -> u8 {
        40
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let config = ctx.config;
        let layout = ctx.layout;

        let mut sources = Vec::new();
        for root in config.java_sources.iter().chain([&layout.gen_dir]) {
            ensure_exists(root, "Source directory")?;
            sources.extend(collect_files(root, "java")?);
        }
        if sources.is_empty() {
            bail!("No .java files found in the configured source directories");
        }
        write_argfile(&layout.javac_args, &sources)?;

        let mut classpath = vec![config.android_jar.clone()];
        classpath.extend(config.classpath.iter().cloned());
        let classpath = env::join_paths(&classpath).context("building javac classpath")?;

        fs::create_dir_all(&layout.classes_dir).with_context(|| {
            format!("creating directory '{}'", layout.classes_dir.display())
        })?;

        let mut cmd = Cmd::new(&ctx.toolchain.javac)
            .args(["-source", &config.java_version])
            .args(["-target", &config.java_version])
            .args(["-encoding", "UTF-8"])
            .arg("-d")
            .arg_path(&layout.classes_dir)
            .arg("-cp")
            .arg(classpath);
        if config.debug_mode {
            cmd = cmd.arg("-g");
        }
        let mut argfile = std::ffi::OsString::from("@");
        argfile.push(layout.javac_args.as_os_str());
        ctx.run(cmd.arg(argfile).error_msg("javac failed"))?;

        let classes = collect_files(&layout.classes_dir, "class")?;
        if classes.is_empty() {
            bail!(
                "javac produced no class files in {}",
                layout.classes_dir.display()
            );
        }
        Ok(classes)
    }
}

/// One quoted path per line; javac treats backslashes inside quotes as escapes.
fn write_argfile(path: &Path, sources: &[PathBuf]) -> Result<()> {
    prepare_output(path)?;
    let mut text = String::new();
    for source in sources {
        let escaped = source
            .to_string_lossy()
            .replace('\\', "\\\\")
            .replace('"', "\\\"");
        text.push('"');
        text.push_str(&escaped);
        text.push_str("\"\n");
    }
    fs::write(path, text).with_context(|| format!("writing '{}'", path.display()))
}
