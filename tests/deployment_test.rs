//! End-to-end deployment: configuration file, scan files, run index, conversion.

mod common;

use common::{Reply, ScriptedHead};
use meltstake_sonar::scan::{CancelFlag, Terminal};
use meltstake_sonar::session::{Deployment, DeploymentOptions, CONFIG_JSON_FILE};
use std::fs;

const CONFIG: &str = r#"
[connection]
port = "/dev/ttyUSB0"

[switch_cmd]
num_sweeps = 1
sector_width = 400
step_size = "fast"

[transport]
retries = 0
backoff_ms = 0
"#;

fn load(root: &std::path::Path) -> Deployment {
    let config_path = root.join("config.toml");
    fs::write(&config_path, CONFIG).unwrap();
    Deployment::load(&DeploymentOptions {
        deployment: "07".to_string(),
        config_path,
        data_dir: root.join("data"),
    })
    .unwrap()
}

#[test]
fn test_settings_are_corrected() {
    let root = tempfile::tempdir().unwrap();
    let deployment = load(root.path());
    let settings = deployment.settings();

    assert_eq!(settings.connection.port.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(settings.params.num_sweeps, 1);
    assert_eq!(settings.params.sector_width, 120);
    assert_eq!(settings.params.step_size, 1);
    assert_eq!(settings.corrections.len(), 2);
}

#[test]
fn test_run_writes_scan_files() {
    let root = tempfile::tempdir().unwrap();
    let deployment = load(root.path());
    let cancel = CancelFlag::new();
    let mut head = ScriptedHead::new(
        [
            Reply::At(0.0),
            Reply::At(0.3),
            Reply::At(0.0),
            Reply::At(-0.3),
            Reply::At(0.0),
        ],
        cancel.clone(),
    );

    assert_eq!(deployment.run(&mut head, cancel).unwrap(), Terminal::Cancelled);
    assert_eq!(head.writes.len(), 5);

    let dir = deployment.data_dir();
    assert!(dir.join(CONFIG_JSON_FILE).is_file());
    assert_eq!(fs::read(dir.join("scan_0.dat")).unwrap().len(), 4 * 14);
    assert!(fs::read(dir.join("scan_1.dat")).unwrap().is_empty());

    let summary = meltstake_sonar::archive::convert_run(&dir).unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.rows, 4);
    assert_eq!(summary.params.map(|p| p.num_sweeps), Some(1));
}
