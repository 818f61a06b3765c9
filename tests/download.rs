use pretty_assertions::assert_eq;
use relflash::{
    error::Error,
    firmware::{download_with_progress, http_client, resolve_latest_firmware_url, ReleaseSource},
    loader::{Connector, Session},
    log_panel::{LogPanel, LogSink},
    workflow::{State, Workflow},
};

/// Connector for workflows which never reach a device
struct Unreachable;

impl Connector for Unreachable {
    fn connect(&mut self, _log: &mut dyn LogSink) -> Result<Session, Error> {
        Err(Error::NoPortAvailable)
    }
}

fn source(server: &mockito::Server) -> ReleaseSource {
    ReleaseSource {
        api_url: server.url(),
        owner: "octo".into(),
        repo: "lamp".into(),
        asset: None,
    }
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn latest_firmware_is_downloaded_with_progress() {
    let mut server = mockito::Server::new();
    let body = firmware(1000);

    let metadata = server
        .mock("GET", "/repos/octo/lamp/releases/latest")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"assets":[{{"browser_download_url":"{}/fw.bin"}}]}}"#,
            server.url()
        ))
        .create();
    let asset = server
        .mock("GET", "/fw.bin")
        .with_status(200)
        .with_body(&body)
        .create();

    let client = http_client().unwrap();
    let mut workflow = Workflow::new(Unreachable, LogPanel::with_writer(Vec::new(), false));

    let downloaded = workflow.download_latest(&client, &source(&server)).unwrap();

    metadata.assert();
    asset.assert();
    assert_eq!(downloaded.len(), 1000);
    assert_eq!(downloaded, body);
    assert_eq!(workflow.state(), State::Idle);

    let entries = workflow.log().entries();
    assert_eq!(entries[0].text(), "Fetching firmware address from GitHub...");
    assert_eq!(
        entries.last().map(|entry| entry.text()),
        Some("Download progress: 100%")
    );
}

#[test]
fn download_url_is_the_first_asset() {
    let mut server = mockito::Server::new();
    let _metadata = server
        .mock("GET", "/repos/octo/lamp/releases/latest")
        .with_status(200)
        .with_body(
            r#"{"tag_name":"v2.0.0","assets":[
                {"name":"merged.bin","browser_download_url":"https://x/fw.bin"},
                {"name":"app.bin","browser_download_url":"https://x/app.bin"}
            ]}"#,
        )
        .create();

    let client = http_client().unwrap();
    let url = resolve_latest_firmware_url(&client, &source(&server)).unwrap();

    assert_eq!(url, "https://x/fw.bin");
}

#[test]
fn progress_reaches_the_declared_length() {
    let mut server = mockito::Server::new();
    let body = firmware(64 * 1024 + 17);
    let _asset = server
        .mock("GET", "/fw.bin")
        .with_status(200)
        .with_body(&body)
        .create();

    let client = http_client().unwrap();
    let mut calls = Vec::new();
    let downloaded =
        download_with_progress(&client, &format!("{}/fw.bin", server.url()), &mut calls).unwrap();

    let total = body.len() as u64;
    assert_eq!(downloaded, body);
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|&(_, declared)| declared == total));
    assert!(calls.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!(calls.last(), Some(&(total, total)));
}

#[test]
fn missing_release_is_a_metadata_error() {
    let mut server = mockito::Server::new();
    let _metadata = server
        .mock("GET", "/repos/octo/lamp/releases/latest")
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create();

    let client = http_client().unwrap();
    let mut workflow = Workflow::new(Unreachable, LogPanel::with_writer(Vec::new(), false));

    let result = workflow.download_latest(&client, &source(&server));

    assert!(matches!(result, Err(Error::MetadataFetch(_))));
    let last = workflow.log().last().unwrap().text();
    assert!(last.starts_with("❌ Error: Failed to fetch release metadata"), "{last}");
}

#[test]
fn release_without_assets_is_rejected() {
    let mut server = mockito::Server::new();
    let _metadata = server
        .mock("GET", "/repos/octo/lamp/releases/latest")
        .with_status(200)
        .with_body(r#"{"assets":[]}"#)
        .create();

    let client = http_client().unwrap();
    let result = resolve_latest_firmware_url(&client, &source(&server));

    assert!(matches!(result, Err(Error::NoFirmwareAsset)));
}

#[test]
fn failed_asset_download_is_a_download_error() {
    let mut server = mockito::Server::new();
    let _asset = server.mock("GET", "/fw.bin").with_status(500).create();

    let client = http_client().unwrap();
    let mut calls = Vec::new();
    let result = download_with_progress(&client, &format!("{}/fw.bin", server.url()), &mut calls);

    assert!(matches!(result, Err(Error::Download(_))));
    assert!(calls.is_empty());
}

#[test]
fn flashing_without_a_device_is_rejected() {
    let mut workflow = Workflow::new(Unreachable, LogPanel::with_writer(Vec::new(), false));

    assert!(matches!(workflow.connect(), Err(Error::NoPortAvailable)));
    assert!(matches!(
        workflow.flash(&firmware(16)),
        Err(Error::NotConnected)
    ));
    assert_eq!(
        workflow.log().last().map(|entry| entry.text()),
        Some("❌ Error: please connect the device first")
    );
}
