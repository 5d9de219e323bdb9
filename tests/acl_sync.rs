mod support;

use forgekit::acl;
use forgekit::model::{AccessLevel, Grant, Group, Subject};
use forgekit::service;
use forgekit::store::Store;
use support::TestForge;

fn populated_forge() -> (TestForge, Store) {
    let forge = TestForge::init();
    let mut store = forge.store();
    forge.add_user(&mut store, "alice");
    forge.add_user(&mut store, "bob");
    forge.add_user(&mut store, "carol");
    store
        .add_user_key("alice", "ssh-ed25519 AAAAC3alice alice@host")
        .unwrap();
    store
        .add_user_key("bob", "ssh-rsa AAAAB3bob bob@host")
        .unwrap();
    store
        .add_group(Group {
            name: "infra".to_string(),
            members: vec!["carol".to_string()],
        })
        .unwrap();

    let parent =
        service::create_project(&mut store, &forge.config, "demo", None, "alice").unwrap();
    {
        let project = store.project_mut(parent).unwrap();
        project.grants.push(Grant {
            subject: Subject::User("bob".to_string()),
            level: AccessLevel::Commit,
        });
        project.grants.push(Grant {
            subject: Subject::Group("infra".to_string()),
            level: AccessLevel::Commit,
        });
    }
    service::create_fork(&mut store, &forge.config, parent, "bob").unwrap();
    store.save().unwrap();
    (forge, store)
}

#[test]
fn regeneration_is_byte_identical() {
    let (forge, store) = populated_forge();
    service::regenerate_acls(&store, &forge.config).unwrap();
    let first_config = std::fs::read(&forge.config.acl.gitolite_config).unwrap();
    let first_keys = std::fs::read(&forge.config.acl.authorized_keys).unwrap();

    service::regenerate_acls(&store, &forge.config).unwrap();
    assert_eq!(
        first_config,
        std::fs::read(&forge.config.acl.gitolite_config).unwrap()
    );
    assert_eq!(
        first_keys,
        std::fs::read(&forge.config.acl.authorized_keys).unwrap()
    );

    // reloading the state from disk must not change the output either
    let reloaded = forge.store();
    assert_eq!(
        String::from_utf8(first_config).unwrap(),
        acl::synthesize_config(&reloaded)
    );
}

#[test]
fn gitolite_config_covers_every_root_and_fork_prefix() {
    let (_forge, store) = populated_forge();
    let config_text = acl::synthesize_config(&store);

    // group header first
    assert!(config_text.starts_with("@infra   = carol\n"));

    // parent blocks: code root unprefixed, the rest prefixed
    for block in ["repo demo\n", "repo docs/demo\n", "repo tickets/demo\n", "repo requests/demo\n"]
    {
        assert!(config_text.contains(block), "missing {block:?}");
    }
    // fork code repo namespaced under forks/
    assert!(config_text.contains("repo forks/bob/demo\n"));
    assert!(config_text.contains("repo docs/bob/demo\n"));

    // everyone reads, the owner and grantees write
    assert!(config_text
        .contains("repo demo\n  R   = @all\n  RW+ = @infra\n  RW+ = alice\n  RW+ = bob\n"));
}

#[test]
fn authorized_keys_pins_the_restricted_command() {
    let (forge, store) = populated_forge();
    let keys = acl::synthesize_authorized_keys(&store, &forge.config.acl.auth_command);

    assert!(keys.starts_with("# gitolite start\n"));
    assert!(keys.ends_with("# gitolite end\n"));
    for line in keys.lines().filter(|line| !line.starts_with('#')) {
        assert!(line.starts_with("command=\""));
        assert!(line.contains("no-port-forwarding"));
        assert!(line.contains("no-pty"));
    }
    // alice before bob, carol (keyless) absent
    let alice = keys.find("aclchecker alice").unwrap();
    let bob = keys.find("aclchecker bob").unwrap();
    assert!(alice < bob);
    assert!(!keys.contains("carol"));
}

#[test]
fn per_user_key_files_are_written() {
    let (forge, store) = populated_forge();
    service::regenerate_acls(&store, &forge.config).unwrap();

    let alice = std::fs::read_to_string(forge.config.acl.key_dir.join("alice.pub")).unwrap();
    assert_eq!(alice, "ssh-ed25519 AAAAC3alice alice@host\n");
    assert!(!forge.config.acl.key_dir.join("carol.pub").exists());
}

#[test]
fn removing_a_project_removes_its_blocks() {
    let (_forge, mut store) = populated_forge();
    let fork_id = store.project_by_fullname("bob/demo").unwrap().id;
    store.remove_project(fork_id).unwrap();
    store.save().unwrap();

    let config_text = acl::synthesize_config(&store);
    assert!(!config_text.contains("forks/bob/demo"));
    assert!(config_text.contains("repo demo\n"));
}
