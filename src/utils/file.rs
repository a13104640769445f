use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::NamedTempFile;

use crate::config::defs::PipelineError;

/// Either a plain or a gzip-decoding reader over an input file.
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(reader) => reader.read(buf),
            FileReader::Gzipped(reader) => reader.read(buf),
        }
    }
}

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Opens a file, transparently decompressing gzip input.
pub fn open_maybe_gzipped(path: &Path) -> io::Result<FileReader> {
    let file = File::open(path)?;
    if is_gzipped(path)? {
        Ok(FileReader::Gzipped(GzDecoder::new(file)))
    } else {
        Ok(FileReader::Uncompressed(BufReader::new(file)))
    }
}

/// Paths of the two user inputs once they are known to exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInputs {
    pub alignment: PathBuf,
    pub template: PathBuf,
}

/// Checks that the alignment and template were both supplied and are readable files.
/// Runs before anything is scheduled so a bad invocation costs no compute.
///
/// # Arguments
///
/// * `alignment` - Path given with --input, if any.
/// * `template` - Path given with --template, if any.
/// * `cwd` - Directory relative paths are resolved against.
///
/// # Returns
/// Absolute paths, MissingInput if an argument is absent, FileNotFound otherwise.
pub fn validate_inputs(
    alignment: Option<&Path>,
    template: Option<&Path>,
    cwd: &Path,
) -> Result<ValidatedInputs, PipelineError> {
    let alignment = alignment.ok_or_else(|| PipelineError::MissingInput("--input (sequence alignment)".to_string()))?;
    let template = template.ok_or_else(|| PipelineError::MissingInput("--template (beastgen template)".to_string()))?;

    Ok(ValidatedInputs {
        alignment: readable_file(alignment, cwd)?,
        template: readable_file(template, cwd)?,
    })
}

fn readable_file(path: &Path, cwd: &Path) -> Result<PathBuf, PipelineError> {
    let full_path = if path.is_absolute() { path.to_path_buf() } else { cwd.join(path) };
    match fs::metadata(&full_path) {
        Ok(meta) if meta.is_file() => {
            File::open(&full_path).map_err(|_| PipelineError::FileNotFound(full_path.clone()))?;
            Ok(full_path)
        }
        _ => Err(PipelineError::FileNotFound(full_path)),
    }
}

/// Makes `source` visible inside a task directory under its own file name.
/// Symlinks on unix, copies elsewhere.
pub fn stage_input(source: &Path, task_dir: &Path) -> io::Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("No file name in {:?}", source)))?;
    let staged = task_dir.join(file_name);
    if staged.exists() || staged.is_symlink() {
        fs::remove_file(&staged)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(source, &staged)?;

    #[cfg(not(unix))]
    fs::copy(source, &staged)?;

    Ok(staged)
}

/// Copies a finished artifact into the results tree. The copy lands in a temp file
/// beside the destination and is renamed into place, so readers never see a partial file.
///
/// # Arguments
///
/// * `source` - Artifact inside a task directory.
/// * `dest_dir` - Results sub-directory.
///
/// # Returns
/// Path of the published copy.
pub fn publish_file(source: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let file_name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("No file name in {:?}", source)))?;
    let dest = dest_dir.join(file_name);

    let mut tmp = NamedTempFile::new_in(dest_dir)?;
    let mut reader = File::open(source)?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.persist(&dest).map_err(|e| e.error)?;
    Ok(dest)
}

/// Writes `contents` to `dest` atomically (temp file + rename).
pub fn write_atomic(dest: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Returns true when `path` exists and holds at least one byte.
pub fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    #[test]
    fn test_validate_inputs_missing_argument() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("template.xml");
        fs::write(&template, "<beast/>").unwrap();

        let err = validate_inputs(None, Some(&template), dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));

        let err = validate_inputs(Some(&template), None, dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn test_validate_inputs_missing_file() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("template.xml");
        fs::write(&template, "<beast/>").unwrap();

        let err = validate_inputs(Some(Path::new("nope.fasta")), Some(&template), dir.path()).unwrap_err();
        match err {
            PipelineError::FileNotFound(path) => assert_eq!(path, dir.path().join("nope.fasta")),
            other => panic!("unexpected error: {other}"),
        }

        // a directory is not a readable input file
        let err = validate_inputs(Some(dir.path()), Some(&template), dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound(_)));
    }

    #[test]
    fn test_validate_inputs_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("aln.fasta"), ">a_2020\nACGT\n").unwrap();
        fs::write(dir.path().join("template.xml"), "<beast/>").unwrap();

        let inputs = validate_inputs(Some(Path::new("aln.fasta")), Some(Path::new("template.xml")), dir.path()).unwrap();
        assert_eq!(inputs.alignment, dir.path().join("aln.fasta"));
        assert_eq!(inputs.template, dir.path().join("template.xml"));
    }

    #[test]
    fn test_is_gzipped() -> io::Result<()> {
        let dir = tempdir()?;
        let plain = dir.path().join("plain.fasta");
        fs::write(&plain, ">a\nACGT\n")?;
        assert!(!is_gzipped(&plain)?);

        let gz = dir.path().join("packed.fasta.gz");
        let mut encoder = GzEncoder::new(File::create(&gz)?, Compression::default());
        encoder.write_all(b">a\nACGT\n")?;
        encoder.finish()?;
        assert!(is_gzipped(&gz)?);

        let mut contents = String::new();
        open_maybe_gzipped(&gz)?.read_to_string(&mut contents)?;
        assert_eq!(contents, ">a\nACGT\n");

        let empty = dir.path().join("empty");
        fs::write(&empty, "")?;
        assert!(!is_gzipped(&empty)?);
        Ok(())
    }

    #[test]
    fn test_publish_file_copies_and_overwrites() -> io::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("run.log");
        fs::write(&source, "first")?;
        let dest_dir = dir.path().join("results").join("beast");

        let published = publish_file(&source, &dest_dir)?;
        assert_eq!(published, dest_dir.join("run.log"));
        assert_eq!(fs::read_to_string(&published)?, "first");

        fs::write(&source, "second")?;
        publish_file(&source, &dest_dir)?;
        assert_eq!(fs::read_to_string(&published)?, "second");
        assert_eq!(fs::read_dir(&dest_dir)?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_stage_input_replaces_existing() -> io::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("aln.fasta");
        fs::write(&source, ">a_2020\nACGT\n")?;
        let task_dir = dir.path().join("task");
        fs::create_dir_all(&task_dir)?;

        let staged = stage_input(&source, &task_dir)?;
        let staged_again = stage_input(&source, &task_dir)?;
        assert_eq!(staged, staged_again);
        assert_eq!(fs::read_to_string(&staged)?, ">a_2020\nACGT\n");
        Ok(())
    }
}
