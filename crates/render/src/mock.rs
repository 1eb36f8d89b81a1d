//! Simulated external tools for testing.

use crate::error::{ErrorKind, Result};
use crate::runner::ToolRunner;
use crate::toolchain::{Invocation, Tool, Toolchain};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// What a simulated tool does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Write the output the real tool would have written.
    Succeed,
    /// Exit with code 1.
    Fail,
    /// Report a timeout.
    TimeOut,
    /// Exit cleanly without writing anything.
    NoOutput,
}

type Hook = Arc<dyn Fn(&Invocation) + Send + Sync>;

/// A real 2x1 RGBA PNG (red, blue), so rasterized output can be decoded.
const PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0xf4, 0x22, 0x7f, 0x8a, 0x00, 0x00, 0x00, 0x0e, 0x49,
    0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0xf8, 0xcf, 0xc0, 0x00, 0x42, 0xff, 0x01, 0x0f, 0xf9, 0x03, 0xfd, 0x85, 0x11,
    0x99, 0x76, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Tool runner that fakes LibreOffice, pdftoppm and ImageMagick.
///
/// Each invocation writes a placeholder file where the real tool would put
/// its output, so the pipeline can run end to end without any of them
/// installed. Every call is recorded, and the runner tracks how many calls
/// overlapped in time.
#[derive(Default)]
pub struct MockRunner {
    behaviours: Mutex<HashMap<Tool, Behaviour>>,
    delay: Mutex<Duration>,
    hook: Mutex<Option<Hook>>,
    calls: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockRunner {
    /// Toolchain with placeholder program names.
    pub fn toolchain() -> Toolchain {
        Toolchain {
            converter: PathBuf::from("mock-libreoffice"),
            rasterizer: PathBuf::from("mock-pdftoppm"),
            fallback: PathBuf::from("mock-convert"),
        }
    }

    pub fn with_behaviour(self, tool: Tool, behaviour: Behaviour) -> Self {
        self.set_behaviour(tool, behaviour);
        self
    }

    /// How long every simulated tool takes.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
        self
    }

    /// Run `hook` at the start of every invocation, before the delay.
    pub fn with_hook(self, hook: impl Fn(&Invocation) + Send + Sync + 'static) -> Self {
        *self.hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(hook));
        self
    }

    pub fn set_behaviour(&self, tool: Tool, behaviour: Behaviour) {
        self.behaviours.lock().unwrap_or_else(|e| e.into_inner()).insert(tool, behaviour);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_to(&self, tool: Tool) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).iter().filter(|c| c.tool == tool).count()
    }

    /// Highest number of invocations that were ever running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn behaviour(&self, tool: Tool) -> Behaviour {
        self.behaviours.lock().unwrap_or_else(|e| e.into_inner()).get(&tool).copied().unwrap_or(Behaviour::Succeed)
    }

    fn output_of(invocation: &Invocation) -> Option<PathBuf> {
        match invocation.tool {
            Tool::Converter => {
                let outdir = invocation.value_of("--outdir")?;
                let stem = invocation.last_arg()?.file_stem()?;
                Some(outdir.join(Path::new(stem).with_extension("pdf")))
            },
            Tool::Rasterizer => invocation.last_arg().map(|prefix| prefix.with_extension("png")),
            Tool::Fallback => invocation.last_arg().map(Path::to_path_buf),
        }
    }
}

impl ToolRunner for MockRunner {
    fn execute(&self, invocation: &Invocation, _timeout: Duration) -> Result<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(invocation.clone());
        let hook = self.hook.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(hook) = hook {
            hook(invocation);
        }
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let result: Result<()> = match self.behaviour(invocation.tool) {
            Behaviour::Succeed => match Self::output_of(invocation) {
                Some(output) => {
                    let contents = if invocation.tool == Tool::Converter { b"%PDF-mock".as_slice() } else { PNG };
                    fs::write(&output, contents).map_err(|e| ErrorKind::Io(e).into())
                },
                None => Err(ErrorKind::MissingOutput(PathBuf::new()).into()),
            },
            Behaviour::Fail => Err(ErrorKind::ToolFailed { tool: invocation.tool.to_string(), code: Some(1) }.into()),
            Behaviour::TimeOut => Err(ErrorKind::ToolTimeout(invocation.tool.to_string()).into()),
            Behaviour::NoOutput => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
