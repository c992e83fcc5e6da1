//! End-to-end flows through the daemon context: plugins publishing
//! payloads, the per-cycle fan-in, consumer queries, and RRD movement
//! between disk and peers.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use domstats::config::DaemonConfig;
use domstats::consts::{page_size, HOST_RRD_ID};
use domstats::ds::{DataSourceSpec, Sample};
use domstats_protocol::crc32;
use domstatsd::context::DaemonContext;
use domstatsd::registry::{InterdomainId, InterdomainMeta, LocalMeta, SamplingFrequency};
use domstatsd::store::{RrdStore, StoreError};
use domstatsd::sync::{self, BackupPolicy, PeerTransport, SyncError};

// ─── Helpers ────────────────────────────────────────────────────────

struct Ds {
    name: &'static str,
    owner: String,
    default_enabled: bool,
    value: f64,
}

fn ds(name: &'static str, owner: &str, default_enabled: bool, value: f64) -> Ds {
    Ds {
        name,
        owner: owner.to_string(),
        default_enabled,
        value,
    }
}

fn v2_payload(timestamp: u64, entries: &[Ds]) -> Vec<u8> {
    let meta_entries: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                r#"{{"name": "{}", "owner": "{}", "default": {}}}"#,
                e.name, e.owner, e.default_enabled
            )
        })
        .collect();
    let meta_json = format!(r#"{{"datasources": [{}]}}"#, meta_entries.join(", "));

    let mut data = Vec::new();
    data.extend_from_slice(&timestamp.to_be_bytes());
    for e in entries {
        data.extend_from_slice(&e.value.to_bits().to_be_bytes());
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(b"DATASOURCES\0");
    buf.extend_from_slice(&crc32(&data).to_be_bytes());
    buf.extend_from_slice(&crc32(meta_json.as_bytes()).to_be_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    buf.extend_from_slice(&data);
    buf.extend_from_slice(&(meta_json.len() as u32).to_be_bytes());
    buf.extend_from_slice(meta_json.as_bytes());
    buf
}

fn v1_payload(timestamp: u64, entries: &[Ds]) -> Vec<u8> {
    let ds_entries: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                r#""{}": {{"owner": "{}", "default": {}, "value": {}}}"#,
                e.name, e.owner, e.default_enabled, e.value
            )
        })
        .collect();
    let body = format!(
        r#"{{"timestamp": {}, "datasources": {{{}}}}}"#,
        timestamp,
        ds_entries.join(", ")
    );

    let digest = format!("{:x}", md5::compute(body.as_bytes()));
    let mut buf = Vec::new();
    buf.extend_from_slice(b"DATASOURCES\n");
    buf.extend_from_slice(digest.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(format!("{:08x}\n", body.len()).as_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf
}

fn test_context() -> (tempfile::TempDir, DaemonContext) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DaemonConfig::default();
    config.paths.rrd_root = dir.path().join("rrd");
    config.paths.plugin_dir = dir.path().join("plugins");
    config.paths.grant_dir = dir.path().join("grants");
    fs::create_dir_all(&config.paths.plugin_dir).unwrap();
    (dir, DaemonContext::new(config))
}

fn five_seconds() -> LocalMeta {
    LocalMeta {
        frequency: SamplingFrequency::FiveSeconds,
    }
}

/// Lay a payload into a page-granular region under the grant dir, the
/// way the toolstack materialises granted pages.
fn materialise_grant(grant_dir: &Path, domid: u32, name: &str, payload: &[u8], pages: usize) {
    let dir = grant_dir.join(domid.to_string());
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, payload).unwrap();
    let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len((pages * page_size()) as u64).unwrap();
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String, bool, Vec<u8>)>>,
}

impl PeerTransport for RecordingTransport {
    fn send_rrd(
        &self,
        address: &str,
        _session: Option<&str>,
        uuid: &str,
        archive: bool,
        body: &[u8],
    ) -> Result<(), SyncError> {
        self.sent
            .lock()
            .push((address.into(), uuid.into(), archive, body.to_vec()));
        Ok(())
    }

    fn fetch_rrd(&self, _address: &str, _secret: &str, _uuid: &str) -> Result<Vec<u8>, SyncError> {
        Err(SyncError::Status { status: 404 })
    }
}

// ─── Producer to consumer pipeline ──────────────────────────────────

#[test]
fn published_samples_reach_consumer_queries() {
    let (_dir, ctx) = test_context();
    let plugin_path = ctx.config.paths.plugin_dir.join("guest-metrics");

    fs::write(
        &plugin_path,
        v2_payload(
            100,
            &[
                ds("cpu0", "vm vm-1", true, 0.40),
                ds("io_wait", "vm vm-1", false, 3.0),
            ],
        ),
    )
    .unwrap();
    ctx.local_plugins
        .register("guest-metrics".into(), five_seconds(), "v2")
        .unwrap();

    ctx.sample_once(1000.0);

    assert_eq!(ctx.store.query_guest_datasource("vm-1", "cpu0"), Ok(0.40));
    // Known but disabled until a consumer asks for it.
    assert_eq!(
        ctx.store.query_guest_datasource("vm-1", "io_wait"),
        Err(StoreError::DatasourceNotFound {
            name: "io_wait".into()
        })
    );
    let listed = ctx.store.list_possible_guest_datasources("vm-1").unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed.iter().filter(|s| s.enabled).count(), 1);

    // Enable the optional datasource, publish again, and both record.
    ctx.store.add_guest_datasource("vm-1", "io_wait").unwrap();
    fs::write(
        &plugin_path,
        v2_payload(
            105,
            &[
                ds("cpu0", "vm vm-1", true, 0.42),
                ds("io_wait", "vm vm-1", false, 4.0),
            ],
        ),
    )
    .unwrap();
    ctx.sample_once(1005.0);

    assert_eq!(ctx.store.query_guest_datasource("vm-1", "cpu0"), Ok(0.42));
    assert_eq!(ctx.store.query_guest_datasource("vm-1", "io_wait"), Ok(4.0));
}

#[test]
fn v1_plugins_share_the_pipeline() {
    let (_dir, ctx) = test_context();
    fs::write(
        ctx.config.paths.plugin_dir.join("host-metrics"),
        v1_payload(200, &[ds("load_avg", "host", true, 0.9)]),
    )
    .unwrap();
    ctx.local_plugins
        .register("host-metrics".into(), five_seconds(), "v1")
        .unwrap();

    ctx.sample_once(2000.0);

    assert_eq!(ctx.store.query_host_datasource("load_avg"), Ok(0.9));
    let listed = ctx.store.list_possible_host_datasources();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].enabled);
}

#[test]
fn unchanged_payloads_contribute_nothing_but_values_persist() {
    let (_dir, ctx) = test_context();
    fs::write(
        ctx.config.paths.plugin_dir.join("host-metrics"),
        v2_payload(300, &[ds("load_avg", "host", true, 1.5)]),
    )
    .unwrap();
    ctx.local_plugins
        .register("host-metrics".into(), five_seconds(), "v2")
        .unwrap();

    ctx.sample_once(3000.0);
    // Same file, same checksum: the second cycle folds an empty batch.
    ctx.sample_once(3005.0);

    assert_eq!(ctx.store.query_host_datasource("load_avg"), Ok(1.5));
}

#[test]
fn a_deregistered_plugin_stops_contributing() {
    let (_dir, ctx) = test_context();
    let a_path = ctx.config.paths.plugin_dir.join("plug-a");
    let b_path = ctx.config.paths.plugin_dir.join("plug-b");
    fs::write(&a_path, v2_payload(1, &[ds("ds_a", "host", true, 1.0)])).unwrap();
    fs::write(&b_path, v2_payload(1, &[ds("ds_b", "host", true, 1.0)])).unwrap();
    ctx.local_plugins
        .register("plug-a".into(), five_seconds(), "v2")
        .unwrap();
    ctx.local_plugins
        .register("plug-b".into(), five_seconds(), "v2")
        .unwrap();

    ctx.sample_once(10.0);
    assert_eq!(ctx.store.query_host_datasource("ds_a"), Ok(1.0));
    assert_eq!(ctx.store.query_host_datasource("ds_b"), Ok(1.0));

    ctx.local_plugins.deregister(&"plug-b".to_string());
    fs::write(&a_path, v2_payload(2, &[ds("ds_a", "host", true, 2.0)])).unwrap();
    fs::write(&b_path, v2_payload(2, &[ds("ds_b", "host", true, 2.0)])).unwrap();
    ctx.sample_once(15.0);

    assert_eq!(ctx.store.query_host_datasource("ds_a"), Ok(2.0));
    // Nobody publishes ds_b any more; its series keeps the last value.
    assert_eq!(ctx.store.query_host_datasource("ds_b"), Ok(1.0));
}

#[test]
fn interdomain_plugins_publish_through_granted_pages() {
    let (_dir, ctx) = test_context();
    materialise_grant(
        &ctx.config.paths.grant_dir,
        5,
        "guest-stats",
        &v2_payload(50, &[ds("runstate", "vm vm-7", true, 2.0)]),
        1,
    );

    let id = InterdomainId {
        name: "guest-stats".into(),
        frontend_domid: 5,
    };
    ctx.interdomain_plugins
        .register(id.clone(), InterdomainMeta { page_refs: vec![0] }, "v2")
        .unwrap();

    ctx.sample_once(500.0);
    assert_eq!(ctx.store.query_guest_datasource("vm-7", "runstate"), Ok(2.0));

    ctx.interdomain_plugins.deregister(&id);
    assert!(!ctx.interdomain_plugins.is_registered(&id));
}

// ─── Disk and peer movement ─────────────────────────────────────────

#[test]
fn backup_then_restart_restores_host_history() {
    let (_dir, ctx) = test_context();
    fs::write(
        ctx.config.paths.plugin_dir.join("host-metrics"),
        v2_payload(400, &[ds("load_avg", "host", true, 0.9)]),
    )
    .unwrap();
    ctx.local_plugins
        .register("host-metrics".into(), five_seconds(), "v2")
        .unwrap();
    ctx.sample_once(4000.0);

    assert!(sync::backup_all(
        &ctx.store,
        &ctx.config.paths.rrd_root,
        BackupPolicy::default(),
    ));

    // A fresh context over the same paths stands in for a restart.
    let restarted = DaemonContext::new(ctx.config.clone());
    let transport = RecordingTransport::default();
    let recovered = sync::load_rrd(
        &transport,
        &restarted.config.pool,
        &restarted.config.paths.rrd_root,
        HOST_RRD_ID,
    )
    .expect("archived host RRD should load");
    restarted.store.set_host(Some(recovered));

    assert_eq!(restarted.store.query_host_datasource("load_avg"), Ok(0.9));
}

#[test]
fn migration_hands_the_rrd_to_the_destination() {
    let (_dir, ctx) = test_context();
    fs::write(
        ctx.config.paths.plugin_dir.join("guest-metrics"),
        v2_payload(500, &[ds("cpu0", "vm vm-1", true, 0.25)]),
    )
    .unwrap();
    ctx.local_plugins
        .register("guest-metrics".into(), five_seconds(), "v2")
        .unwrap();
    ctx.sample_once(5000.0);

    let transport = RecordingTransport::default();
    sync::migrate_guest(&ctx.store, &transport, "peer.example:7654", None, "vm-1");

    assert!(!ctx.store.has_guest_rrd("vm-1"));
    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    let (address, uuid, archive, body) = &sent[0];
    assert_eq!(address, "peer.example:7654");
    assert_eq!(uuid, "vm-1");
    assert!(!archive);

    // The destination daemon replays the insert its handler would do.
    let destination = RrdStore::new();
    destination.replace_guest("vm-1", sync::decode_archive(body).unwrap());
    assert_eq!(
        destination.query_guest_datasource("vm-1", "cpu0"),
        Ok(0.25)
    );
}

// ─── Concurrency ────────────────────────────────────────────────────

#[test]
fn concurrent_guests_update_and_query_independently() {
    let store = Arc::new(RrdStore::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let uuid = format!("vm-{i}");
                for round in 0..500u32 {
                    let value = f64::from(i) + f64::from(round) / 1000.0;
                    let sample = Sample {
                        spec: DataSourceSpec {
                            default_enabled: true,
                            ..DataSourceSpec::named("cpu0")
                        },
                        value,
                    };
                    store.update_guest(&uuid, Some(i64::from(i)), f64::from(round), &[sample]);
                    assert_eq!(store.query_guest_datasource(&uuid, "cpu0"), Ok(value));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8 {
        let uuid = format!("vm-{i}");
        assert_eq!(
            store.query_guest_datasource(&uuid, "cpu0"),
            Ok(f64::from(i) + 0.499)
        );
    }
}
