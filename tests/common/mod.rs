//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: a temporary
//! workspace with rockforge settings, and a scripted [`ToolRunner`] that
//! replays canned tool output while recording every invocation.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use rockforge::config::Settings;
use rockforge::infra::runner::{ToolError, ToolOutput, ToolRunner};
use tempfile::TempDir;

/// Temporary workspace with settings pointing into it
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Settings rooted in this workspace, demo mode off
    pub fn settings(&self) -> Settings {
        Settings {
            build_dir: self.path().join("builds"),
            cache_dir: self.path().join("cache"),
            flash_tool: "rkdeveloptool".to_string(),
            loader_blob: self.path().join("loader.bin"),
            demo_mode: false,
        }
    }

    /// Create a file with the given content, returning its path
    pub fn create_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create a sparse file of the given size (for large-image tests)
    pub fn create_sparse_file(&self, name: &str, len: u64) -> PathBuf {
        let path = self.path().join(name);
        let file = std::fs::File::create(&path).expect("Failed to create file");
        file.set_len(len).expect("Failed to set file length");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Scripted tool runner.
///
/// Responses are keyed by "verb": the first argument for direct tool calls,
/// or the wrapped command name for `sudo` invocations. `rfi` responses can
/// additionally be keyed per storage code as `rfi@<code>`, resolved against
/// the most recent `cs` call. Unscripted verbs succeed with empty output.
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, Result<ToolOutput, ToolError>>>,
    calls: Mutex<Vec<Vec<String>>>,
    last_storage_code: Mutex<Option<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            last_storage_code: Mutex::new(None),
        }
    }

    /// Script a response for a verb (builder style)
    #[must_use]
    pub fn respond(self, verb: &str, output: ToolOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(verb.to_string(), Ok(output));
        self
    }

    /// Script an error for a verb (builder style)
    #[must_use]
    pub fn respond_err(self, verb: &str, error: ToolError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(verb.to_string(), Err(error));
        self
    }

    /// All recorded invocations as `[tool, args...]`
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// How many invocations carried this verb
    pub fn verb_count(&self, verb: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| Self::verb_of(call) == Some(verb.to_string()))
            .count()
    }

    fn verb_of(call: &[String]) -> Option<String> {
        let tool = call.first()?;
        if tool == "sudo" {
            // sudo -n <command> ...
            call.get(2).cloned()
        } else if tool.contains("rkdeveloptool") {
            // Flashing-tool subcommand: ld, db, cs, rfi, wl, rd
            call.get(1).cloned()
        } else {
            Some(tool.clone())
        }
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner for ScriptedRunner {
    async fn run(
        &self,
        tool: &str,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let mut call = vec![tool.to_string()];
        call.extend(args.iter().map(ToString::to_string));
        self.calls.lock().unwrap().push(call.clone());

        let verb = Self::verb_of(&call).unwrap_or_default();

        if verb == "cs" {
            *self.last_storage_code.lock().unwrap() = args.get(1).map(ToString::to_string);
        }

        let responses = self.responses.lock().unwrap();
        if verb == "rfi" {
            if let Some(code) = self.last_storage_code.lock().unwrap().as_ref() {
                if let Some(response) = responses.get(&format!("rfi@{code}")) {
                    return response.clone();
                }
            }
        }
        match responses.get(&verb) {
            Some(response) => response.clone(),
            None => Ok(ToolOutput::ok("")),
        }
    }
}

/// A single maskrom-mode RK3588 listing line
pub const MASKROM_LISTING: &str = "DevNo=1\tVid=0x2207,Pid=0x350b,LocationID=101\tMaskrom";

/// A single loader-mode RK3588 listing line
pub const LOADER_LISTING: &str = "DevNo=1\tVid=0x2207,Pid=0x350b,LocationID=101\tLoader";

/// Flash-info output with a parsable capacity
pub const RFI_EMMC: &str = "Flash Info:\n\tManufacturer: SAMSUNG\n\tFlash Size: 14.6 GB\n";
