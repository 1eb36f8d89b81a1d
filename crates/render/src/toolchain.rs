use derive_more::Display;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// The three external programs the pipeline drives.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Headless office suite, spreadsheet to PDF.
    #[display("converter")]
    Converter,
    /// PDF page to PNG (poppler's `pdftoppm`).
    #[display("rasterizer")]
    Rasterizer,
    /// Generic image converter used when the rasterizer fails (ImageMagick).
    #[display("fallback")]
    Fallback,
}

/// A single external tool invocation: argument vector, never a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}
impl Invocation {
    pub fn new(tool: Tool, program: impl Into<PathBuf>) -> Self {
        Self { tool, program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = impl Into<OsString>>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Value following `flag`, if any.
    pub fn value_of(&self, flag: &str) -> Option<&Path> {
        let idx = self.args.iter().position(|a| a == flag)?;
        self.args.get(idx + 1).map(Path::new)
    }

    pub fn last_arg(&self) -> Option<&Path> {
        self.args.last().map(Path::new)
    }
}

/// Resolved executables for each [`Tool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub converter: PathBuf,
    pub rasterizer: PathBuf,
    pub fallback: PathBuf,
}
impl Toolchain {
    pub const CONVERTERS: [&str; 2] = ["libreoffice", "soffice"];
    pub const RASTERIZERS: [&str; 1] = ["pdftoppm"];
    pub const FALLBACKS: [&str; 2] = ["convert", "magick"];

    /// Look each tool up on `PATH`, taking the first candidate found.
    ///
    /// Missing tools are not an error here: the bare name of the first
    /// candidate is kept, every invocation of it will then fail to start and
    /// the pipeline degrades to "no image".
    pub fn discover<S: AsRef<str>>(converters: &[S], rasterizers: &[S], fallbacks: &[S]) -> Self {
        Self {
            converter: Self::locate(Tool::Converter, converters),
            rasterizer: Self::locate(Tool::Rasterizer, rasterizers),
            fallback: Self::locate(Tool::Fallback, fallbacks),
        }
    }

    fn locate<S: AsRef<str>>(tool: Tool, candidates: &[S]) -> PathBuf {
        for exe in candidates {
            if let Ok(path) = which::which(exe.as_ref()) {
                tracing::debug!(%tool, path = %path.display(), "Discovered external tool");
                return path;
            }
        }
        let fallback = candidates.first().map(|c| c.as_ref()).unwrap_or_default();
        tracing::warn!(%tool, candidates = ?candidates.iter().map(AsRef::as_ref).collect::<Vec<_>>(), "External tool not found in PATH");
        PathBuf::from(fallback)
    }

    pub fn program(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Converter => &self.converter,
            Tool::Rasterizer => &self.rasterizer,
            Tool::Fallback => &self.fallback,
        }
    }

    /// `libreoffice --headless ... --convert-to pdf --outdir <dir> <document>`
    pub fn convert_to_pdf(&self, document: &Path, outdir: &Path) -> Invocation {
        Invocation::new(Tool::Converter, self.program(Tool::Converter))
            .args([
                "--headless",
                "--invisible",
                "--nocrashreport",
                "--nodefault",
                "--nofirststartwizard",
                "--nologo",
                "--norestore",
                "--convert-to",
                "pdf",
                "--outdir",
            ])
            .arg(outdir)
            .arg(document)
    }

    /// `pdftoppm -png -f N -l N -singlefile -r <dpi> <pdf> <prefix>`, writing `<prefix>.png`.
    pub fn rasterize(&self, pdf: &Path, index: usize, dpi: u32, prefix: &Path) -> Invocation {
        let (page, dpi) = ((index + 1).to_string(), dpi.to_string());
        Invocation::new(Tool::Rasterizer, self.program(Tool::Rasterizer))
            .args(["-png", "-f", page.as_str(), "-l", page.as_str(), "-singlefile", "-r", dpi.as_str()])
            .arg(pdf)
            .arg(prefix)
    }

    /// `convert -density <dpi> <pdf>[index] <output>`
    pub fn fallback(&self, pdf: &Path, index: usize, dpi: u32, output: &Path) -> Invocation {
        let mut source = pdf.as_os_str().to_os_string();
        source.push(format!("[{index}]"));
        Invocation::new(Tool::Fallback, self.program(Tool::Fallback))
            .args(["-density".to_string(), dpi.to_string()])
            .arg(source)
            .arg(output)
    }
}
impl Default for Toolchain {
    fn default() -> Self {
        Self::discover(&Self::CONVERTERS, &Self::RASTERIZERS, &Self::FALLBACKS)
    }
}
