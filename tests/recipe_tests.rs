//! The standard recipe's tasks, end to end over a scripted transport.

mod common;

use std::sync::Arc;

use common::{exit, out, MockTransport};
use windlass::config::{Config, MigrateTarget};
use windlass::error::Error;
use windlass::recipes::Deployment;

const RELEASE: &str = "20250826120000";

fn deployment(transport: Arc<MockTransport>, extra: &str) -> Deployment {
    let config = Config::from_str(&format!(
        r#"
        [deploy]
        repository = "/hello/world"
        {}

        [roles]
        app = ["app1", "app2"]
        web = ["web1"]
        db = [{{ host = "db1", primary = true }}]
        "#,
        extra
    ))
    .unwrap();
    Deployment::new(config, transport)
        .unwrap()
        .with_release_name(RELEASE)
}

#[tokio::test]
async fn setup_builds_the_directory_structure_on_every_host() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.setup().await.unwrap();

    let commands = transport.commands();
    assert_eq!(commands.len(), 4);
    for (_, command) in &commands {
        assert_eq!(
            command,
            "mkdir -p -m 775 /u/apps/app/releases /u/apps/app/shared/system \
             && mkdir -p -m 777 /u/apps/app/shared/log"
        );
    }
}

#[tokio::test]
async fn update_code_checks_out_and_relinks_the_shared_directories() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.update_code().await.unwrap();

    let commands = transport.command_lines();
    assert_eq!(commands.len(), 2);
    assert_eq!(
        commands[0],
        format!("svn co -q /hello/world /u/apps/app/releases/{}", RELEASE)
    );
    assert!(commands[1].contains(&format!(
        "ln -nfs /u/apps/app/shared/log /u/apps/app/releases/{}/log",
        RELEASE
    )));
    assert!(commands[1].contains(&format!(
        "ln -nfs /u/apps/app/shared/system /u/apps/app/releases/{}/public/system",
        RELEASE
    )));
}

#[tokio::test]
async fn symlink_points_current_at_the_newest_release() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![out("20250101010101 20250202020202\n"), exit(0)],
    );
    let d = deployment(transport.clone(), "");

    d.symlink().await.unwrap();

    let commands = transport.command_lines();
    assert!(commands.contains(
        &"ln -nfs /u/apps/app/releases/20250202020202 /u/apps/app/current".to_string()
    ));
}

#[tokio::test]
async fn rollback_code_repoints_current_and_deletes_the_newest_release() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![out("20250101010101 20250202020202\n"), exit(0)],
    );
    let d = deployment(transport.clone(), "");

    d.rollback_code().await.unwrap();

    let commands = transport.command_lines();
    assert!(commands.contains(
        &"ln -nfs /u/apps/app/releases/20250101010101 /u/apps/app/current \
          && rm -rf /u/apps/app/releases/20250202020202"
            .to_string()
    ));
}

#[tokio::test]
async fn rollback_code_requires_a_prior_release() {
    let transport = MockTransport::new();
    transport.when_command("ls -x", vec![out("20250101010101\n"), exit(0)]);
    let d = deployment(transport.clone(), "");

    let err = d.rollback_code().await.unwrap_err();
    assert!(matches!(err, Error::NoPriorRelease));
    // Only the listing ran; nothing was deleted.
    assert_eq!(transport.commands().len(), 1);
}

#[tokio::test]
async fn restart_runs_the_reaper_on_application_servers_only() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.restart().await.unwrap();

    let commands = transport.commands();
    let hosts: Vec<_> = commands.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(hosts, vec!["app1", "app2"]);
    for (_, command) in &commands {
        assert_eq!(command, "sudo /u/apps/app/current/script/process/reaper");
    }
}

#[tokio::test]
async fn migrate_targets_the_primary_database_server() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.migrate(None).await.unwrap();

    let commands = transport.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "db1");
    assert_eq!(
        commands[0].1,
        "cd /u/apps/app/current && rake RAILS_ENV=production migrate"
    );
}

#[tokio::test]
async fn migrate_latest_runs_under_the_newest_release() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![out("20250101010101 20250202020202\n"), exit(0)],
    );
    let d = deployment(transport.clone(), "migrate_env = \"SCHEMA=all\"");

    d.migrate(Some(MigrateTarget::Latest)).await.unwrap();

    let migrate = transport
        .commands()
        .into_iter()
        .find(|(_, cmd)| cmd.contains("migrate"))
        .unwrap();
    assert_eq!(migrate.0, "db1");
    assert_eq!(
        migrate.1,
        "cd /u/apps/app/releases/20250202020202 && rake RAILS_ENV=production SCHEMA=all migrate"
    );
}

#[tokio::test]
async fn migrate_refuses_to_run_without_a_primary_database_host() {
    let transport = MockTransport::new();
    let config = Config::from_str(
        r#"
        [deploy]
        repository = "/hello/world"

        [roles]
        app = ["app1"]
        db = ["db1"]
        "#,
    )
    .unwrap();
    let d = Deployment::new(config, transport.clone()).unwrap();

    let err = d.migrate(None).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(transport.commands().is_empty());
}

#[tokio::test]
async fn deploy_checks_out_symlinks_and_restarts() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![out(&format!("20250101010101 {}\n", RELEASE)), exit(0)],
    );
    let d = deployment(transport.clone(), "");

    d.deploy().await.unwrap();

    let commands = transport.command_lines();
    assert!(commands[0].starts_with("svn co -q"));
    assert!(commands.contains(
        &format!("ln -nfs /u/apps/app/releases/{} /u/apps/app/current", RELEASE)
    ));
    assert!(commands
        .iter()
        .any(|c| c == "sudo /u/apps/app/current/script/process/reaper"));
    // Nothing was rolled back.
    let unwind = format!("rm -rf /u/apps/app/releases/{}", RELEASE);
    assert!(!commands.contains(&unwind));
}

#[tokio::test]
async fn failed_symlink_unwinds_the_checkout_everywhere() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![
            out(&format!("20250101010101 20250202020202 {}\n", RELEASE)),
            exit(0),
        ],
    );
    transport.when_host_command(
        "app2",
        &format!("ln -nfs /u/apps/app/releases/{} /u/apps/app/current", RELEASE),
        vec![out("permission denied\n"), exit(1)],
    );
    let d = deployment(transport.clone(), "");

    let err = d.deploy().await.unwrap_err();
    let failed = err.failed_hosts();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].host, "app2");

    let commands = transport.command_lines();
    // The checkout was removed again on every host.
    let unwind = format!("rm -rf /u/apps/app/releases/{}", RELEASE);
    let unwound: Vec<_> = transport
        .commands()
        .into_iter()
        .filter(|(_, cmd)| cmd == &unwind)
        .map(|(host, _)| host)
        .collect();
    assert_eq!(unwound, vec!["app1", "app2", "web1", "db1"]);

    // The failed step's own rollback stayed unused and nothing restarted.
    assert!(!commands.contains(
        &"ln -nfs /u/apps/app/releases/20250202020202 /u/apps/app/current".to_string()
    ));
    assert!(!commands.iter().any(|c| c.contains("reaper")));
}

#[tokio::test]
async fn cleanup_removes_only_the_releases_beyond_the_keep_count() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![
            out("20250101010101 20250202020202 20250303030303 20250404040404 \
                 20250505050505 20250606060606 20250707070707\n"),
            exit(0),
        ],
    );
    let d = deployment(transport.clone(), "");

    d.cleanup().await.unwrap();

    let rm = transport
        .commands()
        .into_iter()
        .find(|(_, cmd)| cmd.contains("rm -rf"))
        .unwrap();
    assert_eq!(
        rm.1,
        "sudo rm -rf /u/apps/app/releases/20250101010101 /u/apps/app/releases/20250202020202"
    );
}

#[tokio::test]
async fn cleanup_is_a_noop_within_the_keep_count() {
    let transport = MockTransport::new();
    transport.when_command(
        "ls -x",
        vec![out("20250101010101 20250202020202 20250303030303\n"), exit(0)],
    );
    let d = deployment(transport.clone(), "");

    d.cleanup().await.unwrap();
    // Only the listing itself was dispatched.
    assert_eq!(transport.commands().len(), 1);
}

#[tokio::test]
async fn spinner_runs_as_the_configured_user_under_sudo() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "spinner_user = \"deploy\"");

    d.spinner().await.unwrap();

    let commands = transport.commands();
    let hosts: Vec<_> = commands.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(hosts, vec!["app1", "app2"]);
    assert_eq!(
        commands[0].1,
        "sudo -u deploy /u/apps/app/current/script/spin"
    );
}

#[tokio::test]
async fn update_current_refreshes_the_working_copy_in_place() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.update_current().await.unwrap();

    let commands = transport.command_lines();
    assert_eq!(commands, vec!["svn up -q /u/apps/app/current".to_string()]);
}

#[tokio::test]
async fn disable_web_uploads_the_maintenance_page_to_the_web_servers() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.disable_web(Some("a migration".into()), Some("at noon".into()))
        .await
        .unwrap();

    let commands = transport.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "web1");
    assert_eq!(
        commands[0].1,
        "cat > /u/apps/app/shared/system/maintenance.html \
         && chmod 644 /u/apps/app/shared/system/maintenance.html"
    );

    let uploaded = transport.sent_to("web1");
    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].contains("down for a migration"));
    assert!(uploaded[0].contains("back at noon"));
    assert_eq!(transport.eof_hosts(), vec!["web1"]);
}

#[tokio::test]
async fn enable_web_removes_the_maintenance_page() {
    let transport = MockTransport::new();
    let d = deployment(transport.clone(), "");

    d.enable_web().await.unwrap();

    let commands = transport.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "web1");
    assert_eq!(
        commands[0].1,
        "rm -f /u/apps/app/shared/system/maintenance.html"
    );
}
