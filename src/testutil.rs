//! Shared test fixtures: a throwaway project tree, a toolchain of empty
//! executables and an invoker that simulates each tool's outputs.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::{BuildConfig, KeyWithCert, SigningConfig};
use crate::pipeline::{ApkBuilder, CancellationToken, OutputSink};
use crate::process::{Interrupted, Invocation, ToolOutput, ToolchainInvoker};
use crate::stages::clean::Clean;
use crate::stages::compile_resources::CompileResources;
use crate::stages::compile_sources::CompileSources;
use crate::stages::convert_bytecode::ConvertBytecode;
use crate::stages::link_resources::LinkResources;
use crate::stages::package_resources::PackageResources;
use crate::stages::{Stage, StageContext};
use crate::toolchain::{Tool, Toolchain};

/// In-memory writer whose contents can be inspected after a run.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records every invocation and writes the files the real tool would.
#[derive(Default)]
pub(crate) struct FakeInvoker {
    calls: Mutex<Vec<Invocation>>,
    failures: Mutex<HashMap<String, String>>,
    silent: Mutex<HashSet<String>>,
    blocked: Mutex<Option<String>>,
    entered: AtomicBool,
    released: AtomicBool,
}

impl FakeInvoker {
    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Make `tool` exit 1 with `stderr`.
    pub(crate) fn fail(&self, tool: &str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(tool.to_string(), stderr.to_string());
    }

    /// Make `tool` exit 0 without producing anything.
    pub(crate) fn succeed_silently(&self, tool: &str) {
        self.silent.lock().unwrap().insert(tool.to_string());
    }

    /// Hold calls to `tool` until [`release`](Self::release) or cancellation.
    pub(crate) fn block(&self, tool: &str) {
        *self.blocked.lock().unwrap() = Some(tool.to_string());
    }

    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub(crate) fn wait_until_blocked(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "tool was never invoked");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn hold(&self, tool: &str, cancel: &CancellationToken) -> Result<()> {
        if self.blocked.lock().unwrap().as_deref() != Some(tool) {
            return Ok(());
        }
        self.entered.store(true, Ordering::SeqCst);
        while !self.released.load(Ordering::SeqCst) {
            if cancel.is_cancelled() {
                return Err(Interrupted {
                    program: tool.to_string(),
                }
                .into());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl ToolchainInvoker for FakeInvoker {
    fn invoke(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let tool = invocation.tool_name();
        self.hold(&tool, cancel)?;

        if let Some(stderr) = self.failures.lock().unwrap().get(&tool) {
            return Ok(ToolOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }
        if !self.silent.lock().unwrap().contains(&tool) {
            simulate(&tool, &invocation.args_lossy())?;
        }
        Ok(ToolOutput {
            code: Some(0),
            stdout: format!("{tool} ok"),
            stderr: String::new(),
        })
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|pos| args.get(pos + 1))
        .map(String::as_str)
}

fn simulate(tool: &str, args: &[String]) -> Result<()> {
    let last = args.last().map(String::as_str).unwrap_or_default();
    match (tool, args.first().map(String::as_str)) {
        ("aapt2", Some("compile")) => {
            fs::write(value_after(args, "-o").unwrap(), "flat")?;
        }
        ("aapt2", Some("link")) => {
            let mut zip = ZipWriter::new(File::create(value_after(args, "-o").unwrap())?);
            for name in ["AndroidManifest.xml", "resources.arsc"] {
                zip.start_file(name, SimpleFileOptions::default())?;
                zip.write_all(b"binary")?;
            }
            zip.finish()?;

            let package = value_after(args, "--rename-manifest-package").unwrap();
            let r_dir = Path::new(value_after(args, "--java").unwrap())
                .join(package.replace('.', "/"));
            fs::create_dir_all(&r_dir)?;
            fs::write(r_dir.join("R.java"), format!("package {package};\npublic final class R {{}}\n"))?;
            if let Some(rules) = value_after(args, "--proguard") {
                fs::write(rules, "-keep class **.R { *; }\n")?;
            }
        }
        ("aapt2", Some("optimize")) => {
            fs::copy(last, value_after(args, "-o").unwrap())?;
        }
        ("javac", _) => {
            let out = Path::new(value_after(args, "-d").unwrap());
            let argfile = fs::read_to_string(last.trim_start_matches('@'))?;
            for line in argfile.lines() {
                let source = Path::new(line.trim_matches('"'));
                let stem = source.file_stem().unwrap().to_string_lossy();
                fs::write(out.join(format!("{stem}.class")), "cafebabe")?;
            }
        }
        ("d8" | "r8", _) => {
            fs::write(Path::new(value_after(args, "--output").unwrap()).join("classes.dex"), "dex")?;
        }
        ("zipalign", _) => {
            fs::copy(&args[args.len() - 2], last)?;
        }
        ("apksigner", _) => {
            fs::copy(last, value_after(args, "--out").unwrap())?;
        }
        _ => {}
    }
    Ok(())
}

/// A project tree that passes preflight.
pub(crate) struct Fixture {
    pub temp: TempDir,
    pub config: BuildConfig,
    pub toolchain: Toolchain,
    pub invoker: Arc<FakeInvoker>,
    pub output: SharedBuffer,
    package: RefCell<Option<PathBuf>>,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let write = |rel: &str, contents: &str| {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        };
        write(
            "res/values/strings.xml",
            "<resources><string name=\"app_name\">Sketch</string></resources>\n",
        );
        write(
            "src/com/example/app/Main.java",
            "package com.example.app;\npublic class Main {}\n",
        );
        let android_jar = write("sdk/android.jar", "");
        let manifest = write("AndroidManifest.xml", "<manifest/>\n");
        let key = write("keys/testkey.pk8", "key");
        let cert = write("keys/testkey.x509.pem", "cert");
        fs::create_dir_all(root.join("build")).unwrap();

        let home = root.join("toolchain");
        let bin = home.join("bin");
        fs::create_dir_all(&bin).unwrap();
        for tool in Tool::ALL {
            let path = bin.join(tool.name());
            fs::write(&path, "").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }

        let config = BuildConfig {
            android_jar,
            build_path: root.join("build"),
            manifest_path: manifest,
            res_dir: root.join("res"),
            java_sources: vec![root.join("src")],
            signing: SigningConfig {
                use_keystore: false,
                keystore: Default::default(),
                key_with_cert: KeyWithCert {
                    key_path: Some(key),
                    cert_path: Some(cert),
                },
            },
            ..Default::default()
        };

        Self {
            config,
            toolchain: Toolchain::from_dir(&home, &bin),
            invoker: Arc::new(FakeInvoker::default()),
            output: SharedBuffer::default(),
            package: RefCell::new(None),
            temp,
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.temp.path()
    }

    pub(crate) fn sink(&self) -> OutputSink {
        OutputSink::new(self.output.clone())
    }

    pub(crate) fn builder(&self) -> ApkBuilder {
        ApkBuilder::new(self.toolchain.clone(), self.sink()).with_invoker(self.invoker.clone())
    }

    /// Run one stage; the current package carries over between calls.
    pub(crate) fn run_stage(&self, stage: &dyn Stage) -> Result<Vec<PathBuf>> {
        let layout = self.config.layout();
        let cancel = CancellationToken::new();
        let sink = self.sink();
        let mut ctx = StageContext::new(
            &self.config,
            &layout,
            &self.toolchain,
            self.invoker.as_ref(),
            &cancel,
            &sink,
        );
        ctx.package = self.package.borrow().clone();
        let result = stage.execute(&mut ctx);
        *self.package.borrow_mut() = ctx.package.take();
        result
    }

    pub(crate) fn run_stages(&self, stages: &[&dyn Stage]) -> Result<()> {
        for stage in stages {
            self.run_stage(*stage)?;
        }
        Ok(())
    }

    /// Run everything up to and including packaging.
    pub(crate) fn run_through_packaging(&self) -> Result<()> {
        self.run_stages(&[
            &Clean,
            &CompileResources,
            &LinkResources,
            &CompileSources,
            &ConvertBytecode,
            &PackageResources,
        ])
    }

    pub(crate) fn package(&self) -> Option<PathBuf> {
        self.package.borrow().clone()
    }
}
