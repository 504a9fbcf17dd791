use anyhow::Result;
use std::path::PathBuf;

use super::{prepare_output, Stage, StageContext};
use crate::process::{ensure_exists, Cmd};

/// Compiles the resource directory into aapt2's intermediate format.
///
/// One `aapt2 compile --dir` call covers every resource file; the result is a
/// single archive of flat files consumed by [`LinkResources`].
///
/// [`LinkResources`]: super::link_resources::LinkResources
pub struct CompileResources;

impl Stage for CompileResources {
    fn name(&self) -> &'static str {
        "compile-resources"
    }

    fn label(&self) -> &'static str {
        "Compiling resources with aapt2..."
    }

    fn progress(&self) -> u8 {
        20
    }

    fn execute(&self, ctx: &mut StageContext<'_>) -> Result<Vec<PathBuf>> {
        let res_dir = &ctx.config.res_dir;
        let output = &ctx.layout.compiled_res;
        ensure_exists(res_dir, "Resources directory")?;
        prepare_output(output)?;

        let mut cmd = Cmd::new(&ctx.toolchain.aapt2)
            .arg("compile")
            .arg("--dir")
            .arg_path(res_dir)
            .arg("-o")
            .arg_path(output);
        if ctx.config.debug_mode {
            cmd = cmd.arg("-v");
        }
        ctx.run(cmd.error_msg("aapt2 compile failed"))?;

        ensure_exists(output, "Compiled resources archive")?;
        Ok(vec![output.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::clean::Clean;
    use crate::testutil::Fixture;

    #[test]
    fn compiles_resource_dir_in_one_call() {
        let fixture = Fixture::new();
        fixture.run_stage(&Clean).unwrap();
        let artifacts = fixture.run_stage(&CompileResources).unwrap();

        let calls = fixture.invoker.calls();
        assert_eq!(calls.len(), 1);
        let args = calls[0].args_lossy();
        assert_eq!(args[0], "compile");
        assert_eq!(args[2], fixture.config.res_dir.to_string_lossy());
        assert_eq!(artifacts, vec![fixture.config.layout().compiled_res]);
    }

    #[test]
    fn tool_failure_carries_stderr() {
        let fixture = Fixture::new();
        fixture.run_stage(&Clean).unwrap();
        fixture
            .invoker
            .fail("aapt2", "res/values/strings.xml:3: error: unescaped apostrophe");

        let err = fixture.run_stage(&CompileResources).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("aapt2 compile failed"));
        assert!(msg.contains("unescaped apostrophe"));
    }

    #[test]
    fn missing_output_is_a_failure() {
        let fixture = Fixture::new();
        fixture.run_stage(&Clean).unwrap();
        fixture.invoker.succeed_silently("aapt2");

        let err = fixture.run_stage(&CompileResources).unwrap_err();
        assert!(err.to_string().contains("Compiled resources archive not found"));
    }
}
