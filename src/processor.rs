//! High-level encrypt and decrypt operations.
//!
//! A [`Processor`] owns everything one orchestrator instance needs: the
//! external toolchain, the rate-limit ledger, the path guard and cached
//! availability probes. Targets in a batch are processed strictly in the
//! order given and each one succeeds or fails on its own.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveBuilder, ArchiveExtractor, existing_entries};
use crate::config::{ARCHIVE_EXTENSION, CHANNEL_TIMEOUT, PASSPHRASE_WORDS, SCRATCH_PREFIX, SCRUB_TIMEOUT};
use crate::error::{Error, Result};
use crate::file::{PathGuard, artifact_path, bundle_name, decrypted_path, is_tar_gzip, remove_original, verify_signature};
use crate::host::{EncryptChoice, Host};
use crate::limiter::RateLimiter;
use crate::passphrase::PassphraseGenerator;
use crate::pty::{Handshake, PtyChannel};
use crate::secret::Passphrase;
use crate::tool::{Tool, Toolchain};
use crate::types::{DecryptReport, EncryptReport, Mode, Restored, Target, describe_selection};

/// Per-run knobs, usually filled from the command line.
#[derive(Clone, Debug)]
pub struct ProcessorOptions {
    /// Words in each generated passphrase
    pub words: usize,
    /// Scrub metadata when the scrubber is installed
    pub scrub: bool,
    /// Delete originals after encryption even if the host chose to keep them
    pub delete_originals: bool,
    pub channel_timeout: Duration,
    pub scrub_timeout: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self { words: PASSPHRASE_WORDS, scrub: true, delete_originals: false, channel_timeout: CHANNEL_TIMEOUT, scrub_timeout: SCRUB_TIMEOUT }
    }
}

pub struct Processor {
    tools: Toolchain,
    options: ProcessorOptions,
    channel: PtyChannel,
    limiter: RateLimiter,
    guard: PathGuard,
    age_ready: OnceCell<bool>,
    scrubber_ready: OnceCell<bool>,
}

impl Processor {
    pub fn new(tools: Toolchain, options: ProcessorOptions) -> Self {
        let channel = PtyChannel::new(tools.age.clone()).with_timeout(options.channel_timeout);
        Self { tools, options, channel, limiter: RateLimiter::default(), guard: PathGuard::default(), age_ready: OnceCell::new(), scrubber_ready: OnceCell::new() }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: PathGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Replaces the per-mode terminal handshake used for every channel run.
    #[must_use]
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.channel = self.channel.with_handshake(handshake);
        self
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    #[inline]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[inline]
    pub fn toolchain(&self) -> &Toolchain {
        &self.tools
    }

    /// Fails with [`Error::DependencyMissing`] unless the encryption tool answers `--version`.
    pub async fn ensure_ready(&self) -> Result<()> {
        let ready = *self.age_ready.get_or_init(|| self.tools.age.probe()).await;
        if ready { Ok(()) } else { Err(Error::DependencyMissing(self.tools.age.name())) }
    }

    async fn scrubber(&self) -> Option<&Tool> {
        if !self.options.scrub {
            return None;
        }
        let ready = *self.scrubber_ready.get_or_init(|| self.tools.mat2.probe()).await;
        if !ready {
            info!(tool = %self.tools.mat2.name(), "metadata scrubber not installed, skipping scrub");
        }
        ready.then_some(&self.tools.mat2)
    }

    /// Encrypts `targets` into a single artifact next to the first one.
    pub async fn encrypt(&self, targets: &[Target], host: &dyn Host) -> Result<EncryptReport> {
        let Some(first) = targets.first() else {
            return Err(Error::validation("nothing selected"));
        };
        self.ensure_ready().await?;
        if let Some(missing) = targets.iter().find(|t| !t.exists()) {
            return Err(Error::validation(format!("{} no longer exists", missing.path().display())));
        }

        let passphrase = PassphraseGenerator::new(self.options.words)?.generate();
        let copied = host.copy_to_clipboard(&passphrase);
        let choice = host.present_passphrase(&passphrase, &describe_selection(targets), copied);
        if choice == EncryptChoice::Cancel {
            info!("encryption cancelled at passphrase dialog");
            return Err(Error::Cancelled);
        }

        let name = bundle_name(targets, Local::now())?;
        let artifact = artifact_path(parent_dir(first.path()), &name);
        if fs::symlink_metadata(&artifact).is_ok() {
            if !host.confirm(&format!("{} already exists. Overwrite it?", artifact.display())) {
                return Err(Error::Cancelled);
            }
        }

        let mut builder = ArchiveBuilder::new(self.tools.tar.clone());
        if let Some(mat2) = self.scrubber().await {
            builder = builder.with_scrubber(mat2.clone(), self.options.scrub_timeout);
        }

        host.busy(Mode::Encrypt.progress_label());
        let sealed = self.seal(&builder, targets, &name, &artifact, &passphrase).await;
        host.idle();
        let (staged, scrubbed) = sealed?;

        let artifact_size = fs::metadata(&artifact).map_err(|e| Error::io_at("cannot read", &artifact, e))?.len();
        info!(artifact = %artifact.display(), size = artifact_size, staged, scrubbed, "encryption finished");

        let mut removals = Vec::new();
        if choice == EncryptChoice::DeleteOriginals || self.options.delete_originals {
            for target in targets {
                let removal = remove_original(&self.tools.shred, &self.guard, target).await;
                removals.push((target.path().to_path_buf(), removal));
            }
        }

        let report = EncryptReport { artifact, artifact_size, staged, scrubbed, removals };
        host.notify("Encryption complete", &encrypt_summary(&report));
        Ok(report)
    }

    /// Builds the archive and encrypts it; the plaintext archive is gone when this returns.
    ///
    /// The tool writes into a scratch directory beside `artifact`, which is only
    /// replaced once encryption succeeded.
    async fn seal(&self, builder: &ArchiveBuilder, targets: &[Target], name: &OsStr, artifact: &Path, passphrase: &Passphrase) -> Result<(usize, usize)> {
        let dir = parent_dir(artifact);
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir_in(dir).map_err(|e| Error::io_at("cannot create scratch directory in", dir, e))?;
        let sealed = scratch.path().join(artifact.file_name().unwrap_or(name));

        let archive = builder.build(targets, name).await?;
        let counts = (archive.staged(), archive.scrubbed());
        self.channel.run(Mode::Encrypt, archive.path(), &sealed, passphrase).await?;
        drop(archive);

        fs::rename(&sealed, artifact).map_err(|e| Error::io_at("cannot write", artifact, e))?;
        Ok(counts)
    }

    /// Decrypts every artifact in `paths`, asking for the passphrase at most once.
    pub async fn decrypt(&self, paths: &[PathBuf], host: &dyn Host) -> Result<DecryptReport> {
        if paths.is_empty() {
            return Err(Error::validation("nothing selected"));
        }
        self.ensure_ready().await?;

        let mut report = DecryptReport::default();
        let mut ready = Vec::with_capacity(paths.len());
        for path in paths {
            let key = ledger_key(path);
            match self.precheck(path, &key) {
                Ok(()) => ready.push((path, key)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping target");
                    report.push(path, Err(e));
                }
            }
        }

        if !ready.is_empty() {
            let passphrase = host.ask_secret("Enter passphrase").filter(|p| !p.is_empty()).ok_or(Error::Cancelled)?;
            for (path, key) in ready {
                host.busy(Mode::Decrypt.progress_label());
                let result = self.decrypt_one(path, &key, &passphrase, host).await;
                host.idle();
                if let Err(e) = &result {
                    error!(path = %path.display(), error = %e, "decryption failed");
                }
                report.push(path, result);
            }
        }

        match report.succeeded() {
            0 => host.show_error("Decryption failed", &decrypt_summary(&report)),
            _ => host.notify("Decryption complete", &decrypt_summary(&report)),
        }
        Ok(report)
    }

    fn precheck(&self, path: &Path, key: &str) -> Result<()> {
        self.limiter.check(key).into_result()?;
        verify_signature(path)
    }

    async fn decrypt_one(&self, artifact: &Path, key: &str, passphrase: &Passphrase, host: &dyn Host) -> Result<Restored> {
        let dir = self.guard.resolve(parent_dir(artifact))?;
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir_in(&dir).map_err(|e| Error::io_at("cannot create scratch directory in", &dir, e))?;
        let payload = scratch.path().join("payload");

        if let Err(e) = self.channel.run(Mode::Decrypt, artifact, &payload, passphrase).await {
            self.limiter.record_failure(key);
            return Err(e);
        }
        self.limiter.clear(key);

        let output = dir.join(decrypted_path(artifact).file_name().unwrap_or_default());
        if is_tar_gzip(&payload)? {
            return self.unpack(&payload, dir, output, host).await;
        }

        if fs::symlink_metadata(&output).is_ok() && !host.confirm(&format!("{} already exists. Overwrite it?", output.display())) {
            return Err(Error::Cancelled);
        }
        fs::rename(&payload, &output).map_err(|e| Error::io_at("cannot write", &output, e))?;
        debug!(output = %output.display(), "payload moved into place");
        Ok(Restored::File(output))
    }

    /// Extracts a decrypted archive into `dir`.
    ///
    /// Entries the archive would replace need one confirmation for the whole
    /// archive. An archive that cannot be listed or extracted is kept as
    /// `<output>.tar.gz`.
    async fn unpack(&self, payload: &Path, dir: PathBuf, output: PathBuf, host: &dyn Host) -> Result<Restored> {
        let extractor = ArchiveExtractor::new(self.tools.tar.clone());
        let members = match extractor.checked_members(payload).await {
            Ok(members) => members,
            Err(e) => return Err(keep_payload(payload, output, e)),
        };

        let clashes = existing_entries(&members, &dir);
        if !clashes.is_empty() && !host.confirm(&format!("{} already exist in {}. Overwrite?", clashes.join(", "), dir.display())) {
            return Err(Error::Cancelled);
        }

        match extractor.extract(payload, &dir).await {
            Ok(()) => {
                info!(into = %dir.display(), members = members.len(), "archive extracted");
                Ok(Restored::Extracted { into: dir, members: members.len() })
            }
            Err(e) => Err(keep_payload(payload, output, e)),
        }
    }
}

/// Moves an unusable archive payload next to the artifact and hands back `error`.
fn keep_payload(payload: &Path, output: PathBuf, error: Error) -> Error {
    let mut kept = output.into_os_string();
    kept.push(ARCHIVE_EXTENSION);
    let kept = PathBuf::from(kept);
    if fs::rename(payload, &kept).is_ok() {
        warn!(kept = %kept.display(), "archive could not be extracted, decrypted payload kept");
    }
    error
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Rate-limit key: the resolved path when it resolves, the given one otherwise.
fn ledger_key(path: &Path) -> String {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()).to_string_lossy().into_owned()
}

pub fn encrypt_summary(report: &EncryptReport) -> String {
    let name = report.artifact.file_name().map_or_else(|| report.artifact.display().to_string(), |n| n.to_string_lossy().into_owned());
    let mut summary = format!("Created {name}");
    if !report.removals.is_empty() {
        summary.push_str(&format!(", {} original(s) deleted", report.originals_deleted()));
        if report.removal_failures() > 0 {
            summary.push_str(&format!(", {} could not be deleted", report.removal_failures()));
        }
    }
    summary
}

pub fn decrypt_summary(report: &DecryptReport) -> String {
    match (report.succeeded(), report.failed()) {
        (ok, 0) => format!("{ok} file(s) decrypted"),
        (0, 1) => report.items.iter().find_map(|item| item.result.as_ref().err()).map_or_else(|| "1 file failed".to_owned(), Error::user_message),
        (ok, failed) => format!("{ok} succeeded, {failed} failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::pty::tests::{fake_age, script_tool};
    use crate::types::Removal;

    struct ScriptedHost {
        secret: Option<String>,
        choice: EncryptChoice,
        overwrite: bool,
        asked: Cell<usize>,
        presented: RefCell<Option<String>>,
        notes: RefCell<Vec<String>>,
        errors: RefCell<Vec<String>>,
    }

    impl ScriptedHost {
        fn new(secret: Option<&str>, choice: EncryptChoice) -> Self {
            Self {
                secret: secret.map(str::to_owned),
                choice,
                overwrite: false,
                asked: Cell::new(0),
                presented: RefCell::new(None),
                notes: RefCell::new(Vec::new()),
                errors: RefCell::new(Vec::new()),
            }
        }

        fn passphrase(&self) -> String {
            self.presented.borrow().clone().unwrap()
        }
    }

    impl Host for ScriptedHost {
        fn ask_secret(&self, _prompt: &str) -> Option<Passphrase> {
            self.asked.set(self.asked.get() + 1);
            self.secret.as_deref().map(Passphrase::new)
        }

        fn present_passphrase(&self, passphrase: &Passphrase, _selection: &str, _copied: bool) -> EncryptChoice {
            *self.presented.borrow_mut() = Some(passphrase.expose_secret().to_owned());
            self.choice
        }

        fn confirm(&self, _question: &str) -> bool {
            self.overwrite
        }

        fn notify(&self, _title: &str, message: &str) {
            self.notes.borrow_mut().push(message.to_owned());
        }

        fn show_error(&self, _title: &str, message: &str) {
            self.errors.borrow_mut().push(message.to_owned());
        }

        fn copy_to_clipboard(&self, _secret: &Passphrase) -> bool {
            false
        }
    }

    struct Fixture {
        _tools_dir: tempfile::TempDir,
        work: tempfile::TempDir,
        processor: Processor,
    }

    fn fixture() -> Fixture {
        let tools_dir = tempfile::tempdir().unwrap();
        let tools = Toolchain {
            age: fake_age(tools_dir.path()),
            mat2: Tool::new("ageguard-missing-mat2"),
            shred: Tool::new("ageguard-missing-shred"),
            ..Toolchain::default()
        };
        let options = ProcessorOptions { channel_timeout: Duration::from_secs(10), ..ProcessorOptions::default() };
        let processor = Processor::new(tools, options).with_guard(PathGuard::with_roots(["/nonexistent-root"]));
        Fixture { _tools_dir: tools_dir, work: tempfile::tempdir().unwrap(), processor }
    }

    fn sealed_with(dir: &Path, name: &str, passphrase: &str, payload: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut data = format!("age-encryption.org/v1\n{passphrase}\n").into_bytes();
        data.extend_from_slice(payload);
        fs::write(&path, data).unwrap();
        path
    }

    fn relocate(artifact: &Path) -> (tempfile::TempDir, PathBuf) {
        let out = tempfile::tempdir().unwrap();
        let moved = out.path().join(artifact.file_name().unwrap());
        fs::rename(artifact, &moved).unwrap();
        (out, moved)
    }

    #[tokio::test]
    async fn test_bundle_round_trip_restores_tree() {
        let fx = fixture();
        let src = fx.work.path();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::write(src.join("b.bin"), [0u8, 159, 146, 150, 255]).unwrap();
        fs::create_dir_all(src.join("photos").join("2024")).unwrap();
        fs::write(src.join("photos").join("2024").join("beach.jpg"), b"jpeg").unwrap();
        let targets: Vec<Target> = ["a.txt", "b.bin", "photos"].iter().map(|n| Target::inspect(src.join(n)).unwrap()).collect();

        let host = ScriptedHost::new(None, EncryptChoice::KeepOriginals);
        let report = fx.processor.encrypt(&targets, &host).await.unwrap();
        let name = report.artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("encrypted_bundle_") && name.ends_with(".age"), "{name}");
        assert_eq!(report.staged, 3);
        assert!(report.removals.is_empty());
        assert!(src.join("a.txt").exists());

        let (out, moved) = relocate(&report.artifact);
        let host = ScriptedHost::new(Some(&host.passphrase()), EncryptChoice::Cancel);
        let decrypted = fx.processor.decrypt(&[moved.clone()], &host).await.unwrap();
        assert_eq!(decrypted.succeeded(), 1);
        assert!(matches!(decrypted.items[0].result, Ok(Restored::Extracted { .. })));

        assert_eq!(fs::read(out.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(out.path().join("b.bin")).unwrap(), [0u8, 159, 146, 150, 255]);
        assert_eq!(fs::read(out.path().join("photos/2024/beach.jpg")).unwrap(), b"jpeg");
        let mut entries: Vec<String> = fs::read_dir(out.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        entries.sort();
        assert_eq!(entries, ["a.txt", "b.bin", name.as_str(), "photos"]);
    }

    #[tokio::test]
    async fn test_single_file_naming_and_deletion() {
        let fx = fixture();
        let report_pdf = fx.work.path().join("report.pdf");
        fs::write(&report_pdf, b"%PDF-1.7").unwrap();
        let host = ScriptedHost::new(None, EncryptChoice::DeleteOriginals);

        let report = fx.processor.encrypt(&[Target::inspect(&report_pdf).unwrap()], &host).await.unwrap();

        assert_eq!(report.artifact, fx.work.path().join("report.pdf.age"));
        assert!(report.artifact.exists());
        assert!(!fx.work.path().join("report.pdf.tar.gz").exists());
        assert!(!report_pdf.exists());
        assert_eq!(report.originals_deleted(), 1);
        assert!(matches!(report.removals[0].1, Removal::Unlinked));
        assert_eq!(host.notes.borrow().len(), 1);

        let host = ScriptedHost::new(Some(&host.passphrase()), EncryptChoice::Cancel);
        let decrypted = fx.processor.decrypt(&[report.artifact.clone()], &host).await.unwrap();
        assert_eq!(decrypted.succeeded(), 1);
        assert_eq!(fs::read(&report_pdf).unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_before_prompt() {
        let fx = fixture();
        let bogus = fx.work.path().join("notes.txt.age");
        fs::write(&bogus, b"definitely not encrypted").unwrap();
        let host = ScriptedHost::new(Some("anything"), EncryptChoice::Cancel);

        let report = fx.processor.decrypt(&[bogus], &host).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert!(matches!(report.items[0].result, Err(Error::Validation(_))));
        assert_eq!(host.asked.get(), 0);
        assert_eq!(host.errors.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_records_failure() {
        let fx = fixture();
        let artifact = sealed_with(fx.work.path(), "diary.txt.age", "right-phrase", b"dear diary");
        let host = ScriptedHost::new(Some("wrong-phrase"), EncryptChoice::Cancel);

        let report = fx.processor.decrypt(&[artifact.clone()], &host).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert!(!fx.work.path().join("diary.txt").exists());
        assert_eq!(fx.processor.limiter().failures(&ledger_key(&artifact)), 1);
        let leftovers = fs::read_dir(fx.work.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_lockout_after_three_failures() {
        let fx = fixture();
        let artifact = sealed_with(fx.work.path(), "vault.age", "right-phrase", b"gold");
        let wrong = ScriptedHost::new(Some("wrong-phrase"), EncryptChoice::Cancel);
        for _ in 0..3 {
            fx.processor.decrypt(&[artifact.clone()], &wrong).await.unwrap();
        }

        let right = ScriptedHost::new(Some("right-phrase"), EncryptChoice::Cancel);
        let report = fx.processor.decrypt(&[artifact.clone()], &right).await.unwrap();

        assert!(matches!(report.items[0].result, Err(Error::RateLimited { .. })));
        assert_eq!(right.asked.get(), 0);
        assert!(!fx.work.path().join("vault").exists());
    }

    #[tokio::test]
    async fn test_success_clears_ledger_and_moves_plain_payload() {
        let fx = fixture();
        let artifact = sealed_with(fx.work.path(), "note.txt.age", "right-phrase", b"hello");
        let wrong = ScriptedHost::new(Some("wrong-phrase"), EncryptChoice::Cancel);
        fx.processor.decrypt(&[artifact.clone()], &wrong).await.unwrap();

        let right = ScriptedHost::new(Some("right-phrase"), EncryptChoice::Cancel);
        let report = fx.processor.decrypt(&[artifact.clone()], &right).await.unwrap();

        let restored = fs::canonicalize(fx.work.path()).unwrap().join("note.txt");
        assert_eq!(report.items[0].result.as_ref().unwrap(), &Restored::File(restored.clone()));
        assert_eq!(fs::read(restored).unwrap(), b"hello");
        assert_eq!(fx.processor.limiter().failures(&ledger_key(&artifact)), 0);
    }

    fn tar_gz(dir: &Path, files: &[(&str, &[u8])]) -> Vec<u8> {
        let src = tempfile::tempdir_in(dir).unwrap();
        for (name, data) in files {
            fs::write(src.path().join(name), data).unwrap();
        }
        let archive = dir.join("build.tar.gz");
        let status = std::process::Command::new("tar").arg("-czf").arg(&archive).arg("-C").arg(src.path()).args(files.iter().map(|(name, _)| name)).status().unwrap();
        assert!(status.success());
        let bytes = fs::read(&archive).unwrap();
        fs::remove_file(archive).unwrap();
        bytes
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state.to_le_bytes()[0]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_corrupt_archive_payload_is_item_failure() {
        let fx = fixture();
        let truncated = tar_gz(fx.work.path(), &[("big.bin", noise(64 * 1024).as_slice())])[..2048].to_vec();
        let broken = sealed_with(fx.work.path(), "broken.age", "pw", &truncated);
        let fine = sealed_with(fx.work.path(), "fine.txt.age", "pw", b"ok");
        let host = ScriptedHost::new(Some("pw"), EncryptChoice::Cancel);

        let report = fx.processor.decrypt(&[broken.clone(), fine], &host).await.unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(host.asked.get(), 1);
        assert_eq!(fs::read(fx.work.path().join("broken.tar.gz")).unwrap(), truncated);
        assert!(!fx.work.path().join("big.bin").exists());
        assert_eq!(fx.processor.limiter().failures(&ledger_key(&broken)), 0);
        assert_eq!(host.notes.borrow()[0], "1 succeeded, 1 failed");
    }

    #[tokio::test]
    async fn test_plain_gzip_payload_restored_as_file() {
        let fx = fixture();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, b"hello log\n").unwrap();
        let compressed = encoder.finish().unwrap();
        let artifact = sealed_with(fx.work.path(), "logs.gz.age", "pw", &compressed);
        let host = ScriptedHost::new(Some("pw"), EncryptChoice::Cancel);

        let report = fx.processor.decrypt(&[artifact], &host).await.unwrap();

        let restored = fx.work.path().join("logs.gz");
        assert!(matches!(&report.items[0].result, Ok(Restored::File(path)) if *path == restored));
        assert_eq!(fs::read(&restored).unwrap(), compressed);
        assert!(!fx.work.path().join("logs.gz.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_extraction_over_existing_entries_needs_confirmation() {
        let fx = fixture();
        let payload = tar_gz(fx.work.path(), &[("notes.txt", b"from archive".as_slice()), ("extra.txt", b"new".as_slice())]);
        let artifact = sealed_with(fx.work.path(), "bundle.age", "pw", &payload);
        fs::write(fx.work.path().join("notes.txt"), b"mine").unwrap();

        let host = ScriptedHost::new(Some("pw"), EncryptChoice::Cancel);
        let report = fx.processor.decrypt(&[artifact.clone()], &host).await.unwrap();
        assert!(matches!(&report.items[0].result, Err(e) if e.is_cancelled()));
        assert_eq!(fs::read(fx.work.path().join("notes.txt")).unwrap(), b"mine");
        assert!(!fx.work.path().join("extra.txt").exists());

        let host = ScriptedHost { overwrite: true, ..ScriptedHost::new(Some("pw"), EncryptChoice::Cancel) };
        let report = fx.processor.decrypt(&[artifact], &host).await.unwrap();
        assert!(matches!(report.items[0].result, Ok(Restored::Extracted { members: 2, .. })));
        assert_eq!(fs::read(fx.work.path().join("notes.txt")).unwrap(), b"from archive");
        assert_eq!(fs::read(fx.work.path().join("extra.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_cancel_writes_nothing() {
        let fx = fixture();
        let file = fx.work.path().join("report.pdf");
        fs::write(&file, b"pdf").unwrap();
        let host = ScriptedHost::new(None, EncryptChoice::Cancel);

        let err = fx.processor.encrypt(&[Target::inspect(&file).unwrap()], &host).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(fs::read_dir(fx.work.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_existing_artifact_needs_confirmation() {
        let fx = fixture();
        let file = fx.work.path().join("report.pdf");
        let existing = fx.work.path().join("report.pdf.age");
        fs::write(&file, b"pdf").unwrap();
        fs::write(&existing, b"older artifact").unwrap();
        let host = ScriptedHost::new(None, EncryptChoice::KeepOriginals);

        let err = fx.processor.encrypt(&[Target::inspect(&file).unwrap()], &host).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fs::read(&existing).unwrap(), b"older artifact");

        let single = Handshake { settle: Duration::from_millis(50), entries: 1, gap: Duration::ZERO };
        let options = ProcessorOptions { channel_timeout: Duration::from_millis(800), ..ProcessorOptions::default() };
        let failing = Processor::new(fx.processor.toolchain().clone(), options).with_handshake(single);
        let host = ScriptedHost { overwrite: true, ..ScriptedHost::new(None, EncryptChoice::KeepOriginals) };
        assert!(failing.encrypt(&[Target::inspect(&file).unwrap()], &host).await.is_err());
        assert_eq!(fs::read(&existing).unwrap(), b"older artifact");
        assert_eq!(fs::read_dir(fx.work.path()).unwrap().count(), 2);

        let host = ScriptedHost { overwrite: true, ..ScriptedHost::new(None, EncryptChoice::KeepOriginals) };
        fx.processor.encrypt(&[Target::inspect(&file).unwrap()], &host).await.unwrap();
        assert!(verify_signature(&existing).is_ok());
        assert_eq!(fs::read_dir(fx.work.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_missing_tool_short_circuits() {
        let work = tempfile::tempdir().unwrap();
        let file = work.path().join("report.pdf");
        fs::write(&file, b"pdf").unwrap();
        let tools = Toolchain { age: Tool::new("ageguard-missing-age"), ..Toolchain::default() };
        let processor = Processor::new(tools, ProcessorOptions::default());
        let host = ScriptedHost::new(Some("pw"), EncryptChoice::KeepOriginals);

        let err = processor.encrypt(&[Target::inspect(&file).unwrap()], &host).await.unwrap_err();
        assert!(matches!(err, Error::DependencyMissing(_)));
        assert!(host.presented.borrow().is_none());

        let err = processor.decrypt(&[file], &host).await.unwrap_err();
        assert!(matches!(err, Error::DependencyMissing(_)));
        assert_eq!(host.asked.get(), 0);
    }

    #[tokio::test]
    async fn test_scrubber_runs_when_installed() {
        let fx = fixture();
        let tools = Toolchain { mat2: script_tool(fx.work.path(), "mat2.sh", "exit 0\n"), ..fx.processor.toolchain().clone() };
        let processor = Processor::new(tools, ProcessorOptions::default()).with_guard(PathGuard::with_roots(["/nonexistent-root"]));
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("photo.jpg"), b"exif").unwrap();
        let host = ScriptedHost::new(None, EncryptChoice::KeepOriginals);

        let report = processor.encrypt(&[Target::inspect(src.path().join("photo.jpg")).unwrap()], &host).await.unwrap();
        assert_eq!(report.scrubbed, 1);
    }

    #[tokio::test]
    async fn test_single_entry_handshake_fails_encryption() {
        let fx = fixture();
        let single = Handshake { settle: Duration::from_millis(50), entries: 1, gap: Duration::ZERO };
        let options = ProcessorOptions { channel_timeout: Duration::from_millis(800), ..ProcessorOptions::default() };
        let processor = Processor::new(fx.processor.toolchain().clone(), options).with_handshake(single);
        let file = fx.work.path().join("notes.txt");
        fs::write(&file, b"notes").unwrap();
        let host = ScriptedHost::new(None, EncryptChoice::KeepOriginals);

        assert!(processor.encrypt(&[Target::inspect(&file).unwrap()], &host).await.is_err());
        assert!(!fx.work.path().join("notes.txt.age").exists());
        assert!(file.exists());
    }
}
