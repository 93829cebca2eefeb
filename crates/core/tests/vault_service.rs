use base64::Engine as _;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vault_core::{
    CoreConfig, DateToken, DeviceNumber, ManifestError, ManifestLimits, RestoreManifest,
    VaultError, VaultService,
};

const CUSTOMER: &str = "alice@example.com";
const CUSTOMER_HASH: &str = "ff8d9819fc0e12bf0d24892e45987e249a28dce836a85cad60e28eaaa8c6d976";

struct Fixture {
    _temp: TempDir,
    service: VaultService,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let cfg = CoreConfig::new(
            temp.path().join("storage"),
            temp.path().join("staging"),
            ManifestLimits::default(),
        )
        .unwrap();
        Self {
            _temp: temp,
            service: VaultService::new(Arc::new(cfg)),
        }
    }

    fn staging(&self) -> &Path {
        self.service.config().staging_dir()
    }

    fn bucket(&self, device: u32, date: &str) -> std::path::PathBuf {
        self.service
            .customer_root(CUSTOMER)
            .join(device.to_string())
            .join(date)
    }

    fn write_part(&self, device: u32, date: &str, part: &str, files: &[(&str, &[u8])]) {
        let bucket = self.bucket(device, date);
        fs::create_dir_all(&bucket).unwrap();
        let mut builder = tar::Builder::new(File::create(bucket.join(part)).unwrap());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o600);
            header.set_mtime(1_704_103_200);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }

    fn write_file(&self, device: u32, date: &str, name: &str, len: usize) {
        let bucket = self.bucket(device, date);
        fs::create_dir_all(&bucket).unwrap();
        fs::write(bucket.join(name), vec![0u8; len]).unwrap();
    }
}

fn device(n: u32) -> DeviceNumber {
    DeviceNumber::new(n).unwrap()
}

fn manifest_blob(pairs: &[(&str, &str)]) -> Vec<u8> {
    RestoreManifest::encode(pairs.iter().copied())
        .unwrap()
        .into_bytes()
}

fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn staged_requests(staging: &Path) -> usize {
    fs::read_dir(staging).map(|r| r.count()).unwrap_or(0)
}

#[test]
fn customer_root_is_pinned_sha256_of_identity() {
    let fixture = Fixture::new();
    let root = fixture.service.customer_root(CUSTOMER);
    assert_eq!(root.file_name().unwrap().to_str().unwrap(), CUSTOMER_HASH);
    assert_eq!(root, fixture.service.customer_root(CUSTOMER));
}

#[test]
fn provision_is_idempotent() {
    let fixture = Fixture::new();
    let first = fixture.service.provision_customer(CUSTOMER).unwrap();
    let second = fixture.service.provision_customer(CUSTOMER).unwrap();
    assert_eq!(first, second);
    assert!(first.is_dir());
    assert!(fixture.service.devices(CUSTOMER).unwrap().is_empty());
}

#[test]
fn usage_matches_part_sizes_in_megabytes() {
    let fixture = Fixture::new();
    fixture.write_file(1, "20240101", "b1-000001.tar", 6_291_456);
    fixture.write_file(1, "20240101", "b1-000002.tar", 6_291_456);
    fixture.write_file(1, "20240101", "b1.katalog.enc", 128);

    let bytes = fixture.service.usage(CUSTOMER, Some(device(1))).unwrap();
    assert_eq!(bytes, 12_582_912);

    let report = fixture.service.usage_report(CUSTOMER).unwrap();
    assert_eq!(report.total_bytes, 12_582_912);
    assert!((report.total_megabytes() - 12.58).abs() < 0.01);

    assert_eq!(fixture.service.usage(CUSTOMER, None).unwrap(), bytes);
    assert_eq!(fixture.service.usage(CUSTOMER, Some(device(2))).unwrap(), 0);
}

#[test]
fn total_usage_is_exact_sum_across_devices() {
    let fixture = Fixture::new();
    fixture.write_file(1, "20240101", "a-000001.tar", 1_001);
    fixture.write_file(1, "20240101", "a.katalog.enc", 1);
    fixture.write_file(1, "20240201", "b-000001.tar", 2_002);
    fixture.write_file(1, "20240201", "b.katalog.enc", 1);
    fixture.write_file(3, "20240301", "c-000001.tar", 3_003);
    fixture.write_file(3, "20240301", "c.katalog.enc", 1);

    assert_eq!(
        fixture.service.devices(CUSTOMER).unwrap(),
        vec![device(1), device(3)]
    );
    assert_eq!(fixture.service.usage(CUSTOMER, None).unwrap(), 6_006);
}

#[test]
fn list_catalog_and_latest_backup() {
    let fixture = Fixture::new();
    fixture.write_file(1, "20240102", "n-000001.tar", 20);
    fixture.write_file(1, "20240102", "n.katalog.enc", 1);
    fixture.write_file(1, "20231230", "o-000001.tar", 10);
    fixture.write_file(1, "20231230", "o.katalog.enc", 1);

    let catalog = fixture.service.list_catalog(CUSTOMER, device(1)).unwrap();
    let dates: Vec<String> = catalog.iter().map(|e| e.date.to_string()).collect();
    assert_eq!(dates, ["20231230", "20240102"]);

    let latest = fixture
        .service
        .latest_backup(CUSTOMER, device(1))
        .unwrap()
        .unwrap();
    assert_eq!(latest.date.to_string(), "20240102");
    assert_eq!(latest.markers.get("n.katalog.enc"), Some(&20));

    assert!(fixture.service.latest_backup(CUSTOMER, device(9)).unwrap().is_none());
    assert!(fixture.service.list_catalog(CUSTOMER, device(9)).unwrap().is_empty());
}

#[test]
fn restore_returns_exactly_the_requested_file() {
    let fixture = Fixture::new();
    fixture.write_part(
        1,
        "20240101",
        "b1-000001.tar",
        &[("report.pdf.enc", b"ciphertext"), ("photo.jpg.enc", b"img")],
    );

    let blob = manifest_blob(&[("20240101 10:00:00", "report.pdf")]);
    let outcome = fixture.service.restore(CUSTOMER, device(1), &blob).unwrap();

    assert_eq!(entry_names(outcome.path()), ["report.pdf.enc"]);
    assert!(outcome.path().starts_with(fixture.staging()));
}

#[test]
fn restore_skips_absent_and_continues() {
    let fixture = Fixture::new();
    fixture.write_part(1, "20240101", "b-000001.tar", &[("b.enc", b"B")]);
    fixture.write_part(1, "20240102", "c-000001.tar", &[("c.enc", b"C")]);

    let blob = manifest_blob(&[("20240101", "a"), ("20240101", "b"), ("20240102", "c")]);
    let outcome = fixture.service.restore(CUSTOMER, device(1), &blob).unwrap();

    assert_eq!(outcome.skipped, 1);
    assert_eq!(entry_names(outcome.path()), ["b.enc", "c.enc"]);
}

#[test]
fn restore_collapses_names_that_resolve_to_one_entry() {
    let fixture = Fixture::new();
    fixture.write_part(1, "20240101", "b-000001.tar", &[("x.enc", b"X")]);

    let blob = manifest_blob(&[("20240101", "a/x"), ("20240101", "b/x")]);
    let outcome = fixture.service.restore(CUSTOMER, device(1), &blob).unwrap();

    assert_eq!(entry_names(outcome.path()), ["x.enc"]);
    assert_eq!(outcome.skipped, 0);
}

#[test]
fn restore_with_unbounded_size_limit() {
    let temp = TempDir::new().unwrap();
    let cfg = CoreConfig::from_env_values(
        Some(temp.path().join("storage").display().to_string()),
        Some(temp.path().join("staging").display().to_string()),
        Some(usize::MAX.to_string()),
        None,
    )
    .unwrap();
    let service = VaultService::new(Arc::new(cfg));
    let bucket = service.customer_root(CUSTOMER).join("1").join("20240101");
    fs::create_dir_all(&bucket).unwrap();
    let mut builder = tar::Builder::new(File::create(bucket.join("b-000001.tar")).unwrap());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(1);
    header.set_mode(0o600);
    header.set_cksum();
    builder.append_data(&mut header, "a.enc", &b"A"[..]).unwrap();
    builder.finish().unwrap();

    let blob = manifest_blob(&[("20240101", "a")]);
    let outcome = service.restore(CUSTOMER, device(1), &blob).unwrap();
    assert_eq!(entry_names(outcome.path()), ["a.enc"]);
}

#[test]
fn catalog_file_resolves_marker_for_download() {
    let fixture = Fixture::new();
    fixture.write_file(1, "20240101", "a.katalog.enc", 3);
    let date = DateToken::parse("20240101").unwrap();

    let marker = fixture
        .service
        .catalog_file(CUSTOMER, device(1), &date, "a.katalog.enc")
        .unwrap()
        .unwrap();
    assert_eq!(marker.path, fixture.bucket(1, "20240101").join("a.katalog.enc"));

    assert!(fixture
        .service
        .catalog_file(CUSTOMER, device(2), &date, "a.katalog.enc")
        .unwrap()
        .is_none());
    let err = fixture
        .service
        .catalog_file(CUSTOMER, device(1), &date, "a-000001.tar")
        .unwrap_err();
    assert!(err.is_client_error());
}

#[test]
fn restore_without_separator_is_decode_error_and_stages_nothing() {
    let fixture = Fixture::new();
    fixture.write_part(1, "20240101", "b-000001.tar", &[("a.enc", b"A")]);

    let text = "20240101;a|20240101 b|";
    let compressed = zstd::stream::encode_all(text.as_bytes(), 0).unwrap();
    let blob = base64::engine::general_purpose::STANDARD.encode(compressed);

    let err = fixture
        .service
        .restore(CUSTOMER, device(1), blob.as_bytes())
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::DecodeManifest(ManifestError::MissingSeparator { .. })
    ));
    assert!(err.is_client_error());
    assert_eq!(staged_requests(fixture.staging()), 0);
}

#[test]
fn restore_is_repeatable_with_distinct_outputs() {
    let fixture = Fixture::new();
    fixture.write_part(1, "20240101", "b-000001.tar", &[("a.enc", b"A"), ("b.enc", b"B")]);
    let blob = manifest_blob(&[("20240101", "a"), ("20240101", "b")]);

    let first = fixture.service.restore(CUSTOMER, device(1), &blob).unwrap();
    let second = fixture.service.restore(CUSTOMER, device(1), &blob).unwrap();
    assert_ne!(first.path(), second.path());
    assert_eq!(entry_names(first.path()), entry_names(second.path()));
}

#[test]
fn uploaded_part_can_be_restored() {
    let fixture = Fixture::new();
    let date = DateToken::parse("20240101").unwrap();

    let mut part = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(4);
    header.set_mode(0o644);
    header.set_cksum();
    part.append_data(&mut header, "notes.txt.enc", &b"data"[..])
        .unwrap();
    let part = part.into_inner().unwrap();

    let stored = fixture
        .service
        .store_upload(CUSTOMER, device(2), &date, "bk-000001.tar", part.as_slice())
        .unwrap();
    assert_eq!(stored.size_bytes, part.len() as u64);
    assert_eq!(stored.sha256.len(), 64);

    let blob = manifest_blob(&[("2024-01-01T08:15:00", "notes.txt")]);
    let outcome = fixture.service.restore(CUSTOMER, device(2), &blob).unwrap();

    let mut archive = tar::Archive::new(File::open(outcome.path()).unwrap());
    let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
    assert_eq!(entry.path().unwrap().to_str().unwrap(), "notes.txt.enc");
    assert_eq!(entry.header().mode().unwrap(), 0o644);
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    assert_eq!(data, b"data");
}

#[test]
fn upload_never_overwrites() {
    let fixture = Fixture::new();
    let date = DateToken::parse("20240101").unwrap();
    fixture
        .service
        .store_upload(CUSTOMER, device(1), &date, "x.katalog.enc", &b"one"[..])
        .unwrap();

    let err = fixture
        .service
        .store_upload(CUSTOMER, device(1), &date, "x.katalog.enc", &b"two"[..])
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidInput(_)));
}

#[test]
fn export_catalog_without_markers_is_no_catalog() {
    let fixture = Fixture::new();
    fixture.write_part(1, "20240101", "b-000001.tar", &[("a.enc", b"A")]);

    let err = fixture
        .service
        .export_catalog(CUSTOMER, device(1))
        .unwrap_err();
    assert!(matches!(err, VaultError::NoCatalog));
    assert!(err.is_client_error());
}

#[test]
fn export_catalog_collects_markers() {
    let fixture = Fixture::new();
    fixture.write_file(1, "20240101", "a.katalog.enc", 3);
    fixture.write_file(1, "20240105", "b.katalog.enc", 3);

    let archive = fixture.service.export_catalog(CUSTOMER, device(1)).unwrap();
    assert_eq!(
        entry_names(archive.path()),
        ["20240101/a.katalog.enc", "20240105/b.katalog.enc"]
    );
}

#[test]
fn service_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync + Clone>() {}
    assert_send_sync::<VaultService>();

    let fixture = Fixture::new();
    fixture.write_part(1, "20240101", "b-000001.tar", &[("a.enc", b"A")]);
    let blob = manifest_blob(&[("20240101", "a")]);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = fixture.service.clone();
            let blob = blob.clone();
            std::thread::spawn(move || {
                service
                    .restore(CUSTOMER, device(1), &blob)
                    .unwrap()
                    .path()
                    .to_path_buf()
            })
        })
        .collect();
    let mut paths: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
}
