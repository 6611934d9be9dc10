use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// @module: File and directory utilities

/// Ebook container formats the binary knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    PlainText,
    Epub,
    Fb2,
    Html,
}

impl DocumentFormat {
    // @returns: Whether a built-in reader exists for the format
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Json | Self::PlainText)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::PlainText => "txt",
            Self::Epub => "epub",
            Self::Fb2 => "fb2",
            Self::Html => "html",
        }
    }
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    // @detects: Container format from the file extension
    pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<DocumentFormat> {
        let ext = path
            .as_ref()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(DocumentFormat::Json),
            "txt" | "text" => Ok(DocumentFormat::PlainText),
            "epub" => Ok(DocumentFormat::Epub),
            "fb2" => Ok(DocumentFormat::Fb2),
            "html" | "htm" | "xhtml" => Ok(DocumentFormat::Html),
            other => Err(anyhow!("Unrecognized document extension: '{}'", other)),
        }
    }

    // @generates: Output path for the translated book
    // @params: input_file, output_dir, target_language, extension
    pub fn generate_output_path<P1: AsRef<Path>, P2: AsRef<Path>>(
        input_file: P1,
        output_dir: P2,
        target_language: &str,
        extension: &str,
    ) -> PathBuf {
        let input_file = input_file.as_ref();
        let stem = input_file.file_stem().unwrap_or_default();

        let mut output_filename = stem.to_string_lossy().to_string();
        output_filename.push('.');
        output_filename.push_str(target_language);
        output_filename.push('.');
        output_filename.push_str(extension);

        output_dir.as_ref().join(output_filename)
    }

    // @generates: Report path that sits next to the output
    pub fn report_path_for<P: AsRef<Path>>(output: P) -> PathBuf {
        let output = output.as_ref();
        let mut name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        name.push_str(".report.json");
        output.with_file_name(name)
    }

    /// Read a file to bytes
    pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        fs::read(&path).with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write bytes so readers see either the old file or the new one
    ///
    /// The data goes to a temp file in the target directory which is then
    /// renamed over the destination.
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::ensure_dir(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| anyhow!("Failed to persist {:?}: {}", path, e.error))?;
        Ok(())
    }

    /// Append one line to a file, creating it if needed
    pub fn append_line<P: AsRef<Path>>(path: P, line: &str) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                Self::ensure_dir(parent)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {:?}", path.as_ref()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
