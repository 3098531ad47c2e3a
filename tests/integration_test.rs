//! End-to-end runs over the in-memory registry.

use std::sync::Arc;
use std::time::Duration;

use consul_template::config::{Config, ConfigTemplate};
use consul_template::registry::{MemoryRegistry, RegistryClient, ServiceRecord};
use consul_template::runner::{Runner, RunnerCommand};
use tempfile::TempDir;

fn client_for(registry: &Arc<MemoryRegistry>) -> Arc<dyn RegistryClient> {
    Arc::clone(registry) as Arc<dyn RegistryClient>
}

#[tokio::test]
async fn test_once_mode_renders_service_template() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.ctmpl");
    let destination = dir.path().join("out.txt");
    std::fs::write(&source, "{{#each (service \"consul\")}}{{this.Name}}{{/each}}").unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    registry.set_service(
        "consul",
        vec![ServiceRecord {
            name: "consul".into(),
            ..ServiceRecord::default()
        }],
    );

    let config = Config {
        templates: vec![ConfigTemplate {
            source,
            destination: destination.clone(),
            command: None,
        }],
        ..Config::default()
    };

    let mut runner = Runner::new(config, client_for(&registry), false, true).unwrap();
    runner.set_once_timeout(Duration::from_secs(5));
    runner.start().await.unwrap();

    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "consul");
}

#[tokio::test]
async fn test_once_mode_waits_for_all_dependencies() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.ctmpl");
    let destination = dir.path().join("out.txt");
    std::fs::write(
        &source,
        "{{key \"config/greeting\"}} {{#each (service \"web\")}}{{this.Node}}{{/each}}",
    )
    .unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    registry.set_key("config/greeting", "hello");
    registry.set_service(
        "web",
        vec![ServiceRecord {
            node: "web1".into(),
            name: "web".into(),
            ..ServiceRecord::default()
        }],
    );

    let config = Config {
        templates: vec![ConfigTemplate {
            source,
            destination: destination.clone(),
            command: None,
        }],
        ..Config::default()
    };

    let mut runner = Runner::new(config, client_for(&registry), false, true).unwrap();
    runner.set_once_timeout(Duration::from_secs(5));
    runner.start().await.unwrap();

    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "hello web1");
}

#[tokio::test]
async fn test_daemon_rerenders_on_update_and_stops() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.ctmpl");
    let destination = dir.path().join("out.txt");
    std::fs::write(&source, "max={{key \"config/max\"}}").unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    registry.set_key("config/max", "1");

    let config = Config {
        templates: vec![ConfigTemplate {
            source,
            destination: destination.clone(),
            command: None,
        }],
        ..Config::default()
    };

    let mut runner = Runner::new(config, client_for(&registry), false, false).unwrap();
    let control = runner.control();
    let handle = tokio::spawn(async move { runner.start().await });

    // Wait for the first render, then push an update and wait for the
    // re-render. Observability is polled, never slept for a fixed time.
    wait_for_contents(&destination, "max=1").await;
    registry.set_key("config/max", "2");
    wait_for_contents(&destination, "max=2").await;

    control.send(RunnerCommand::Stop).await.unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_daemon_forgets_removed_dependencies() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.ctmpl");
    let destination = dir.path().join("out.txt");
    std::fs::write(&source, "a={{key \"config/a\"}}").unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    registry.set_key("config/a", "1");
    registry.set_key("config/b", "1");

    let config = Config {
        templates: vec![ConfigTemplate {
            source: source.clone(),
            destination: destination.clone(),
            command: None,
        }],
        ..Config::default()
    };

    let mut runner = Runner::new(config, client_for(&registry), false, false).unwrap();
    let control = runner.control();
    let handle = tokio::spawn(async move { runner.start().await });

    wait_for_contents(&destination, "a=1").await;

    // Swap the template to reference a different key; the old
    // dependency must be dropped after the next scan.
    std::fs::write(&source, "b={{key \"config/b\"}}").unwrap();
    registry.set_key("config/a", "2");
    wait_for_contents(&destination, "b=1").await;

    control.send(RunnerCommand::Stop).await.unwrap();
    handle.await.unwrap().unwrap();
}

async fn wait_for_contents(path: &std::path::Path, expected: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if contents == expected {
                return;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {} to contain {:?}", path.display(), expected);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
