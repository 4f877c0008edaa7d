//! Keyfile serialisation is idempotent for every chroot kind
//!
//! A chroot read from a keyfile and written back must read back as the same
//! chroot, and writing it a second time must not change the text.

use rschroot::chroot::facet::Userdata;
use rschroot::chroot::Chroot;
use rschroot::config::chroots::{ChrootConfig, Namespace};
use rschroot::config::keyfile::Keyfile;
use std::fs;
use tempfile::TempDir;

fn round_trip(text: &str, group: &str, session: bool) -> Chroot {
    let keyfile = Keyfile::parse(text, None).unwrap();
    let chroot = Chroot::from_keyfile(&keyfile, group, session).unwrap();

    let mut first = Keyfile::new();
    chroot.keyfile_get(&mut first);
    let reparsed = Keyfile::parse(&first.to_string(), None).unwrap();
    let again = Chroot::from_keyfile(&reparsed, group, session).unwrap();
    assert_eq!(chroot, again, "{}", first);

    let mut second = Keyfile::new();
    again.keyfile_get(&mut second);
    assert_eq!(first.to_string(), second.to_string());
    again
}

#[test]
fn every_kind_round_trips() {
    let cases = [
        ("plain", "directory=/srv/chroot/plain\n"),
        ("directory", "directory=/srv/chroot/sid\n"),
        ("file", "file=/srv/chroot/lenny.tar.gz\nlocation=/lenny\n"),
        ("block-device", "device=/dev/vg0/sid\nmount-options=-o noatime\n"),
        (
            "lvm-snapshot",
            "device=/dev/vg0/sid\nlvm-snapshot-options=--size 2G\n",
        ),
        (
            "btrfs-snapshot",
            "btrfs-source-subvolume=/srv/btrfs/sid\nbtrfs-snapshot-directory=/srv/btrfs/snapshots\n",
        ),
        (
            "custom",
            "custom-session-cloneable=true\ncustom-source-cloneable=false\n",
        ),
    ];

    for (kind, keys) in cases {
        let text = format!(
            "[test]\ntype={}\ndescription=Round trip {}\n{}users=alice,bob\nroot-groups=sbuild\n",
            kind, kind, keys
        );
        let chroot = round_trip(&text, "test", false);
        assert_eq!(chroot.type_name(), kind);
        assert_eq!(chroot.users(), ["alice", "bob"]);
    }
}

#[test]
fn common_settings_round_trip() {
    let text = "\
[sid]
type=directory
directory=/srv/chroot/sid
aliases=unstable,default
command-prefix=eatmydata
message-verbosity=verbose
preserve-environment=true
environment-filter=^(LD_.*|IFS)$
personality=linux32
unshare.net=true
sbuild.resolver=aptitude
user-modifiable-keys=sbuild.resolver
";
    let chroot = round_trip(text, "sid", false);
    assert_eq!(chroot.aliases(), ["unstable", "default"]);
    assert_eq!(chroot.command_prefix(), ["eatmydata"]);
    assert!(chroot.preserve_environment());
    assert_eq!(chroot.personality().name(), "linux32");
    assert!(!chroot.unshare().is_empty());
}

#[test]
fn session_descriptor_round_trips() {
    let text = "\
[sid-1234]
type=file
active=true
name=sid-1234
file=/srv/chroot/sid.tar.gz
file-repack=true
mount-location=/var/lib/schroot/mount/sid-1234
original-name=sid
selected-name=unstable
users=alice
";
    let chroot = round_trip(text, "sid-1234", true);
    assert!(chroot.active());
    assert_eq!(
        chroot.mount_location().map(|p| p.display().to_string()),
        Some("/var/lib/schroot/mount/sid-1234".to_string())
    );
}

#[test]
fn session_keys_are_rejected_in_definitions() {
    let text = "[sid]\ntype=directory\ndirectory=/srv/sid\nmount-location=/mnt/sid\n";
    let keyfile = Keyfile::parse(text, None).unwrap();
    assert!(Chroot::from_keyfile(&keyfile, "sid", false).is_err());
}

#[test]
fn written_configuration_loads_into_registry() {
    let dir = TempDir::new().unwrap();
    let text = "\
[sid]
type=directory
directory=/srv/chroot/sid
aliases=unstable

[lenny]
type=file
file=/srv/chroot/lenny.tar.gz
";
    let original = Keyfile::parse(text, None).unwrap();
    let mut written = Keyfile::new();
    for group in ["sid", "lenny"] {
        Chroot::from_keyfile(&original, group, false)
            .unwrap()
            .keyfile_get(&mut written);
    }
    let path = dir.path().join("chroots.conf");
    fs::write(&path, written.to_string()).unwrap();

    let mut config = ChrootConfig::new();
    config.add_file(&path, Namespace::Chroot).unwrap();
    assert_eq!(
        config.find_alias(Namespace::Chroot, "unstable").as_deref(),
        Some("chroot:sid")
    );
    // File chroots are source-clonable
    assert_eq!(
        config.find_alias(Namespace::Source, "lenny").as_deref(),
        Some("source:lenny")
    );
}

#[test]
fn user_options_cannot_add_keys_to_a_descriptor() {
    let text = "\
[sid-1]
type=directory
active=true
name=sid-1
directory=/srv/chroot/sid
mount-location=/var/lib/schroot/mount/sid-1
users=bob
setup.note=plain
user-modifiable-keys=setup.note
";
    let keyfile = Keyfile::parse(text, None).unwrap();
    let mut session = Chroot::from_keyfile(&keyfile, "sid-1", true).unwrap();
    session
        .set_user_option("setup.note", "x\nroot-users=bob", false)
        .unwrap();

    let mut written = Keyfile::new();
    session.keyfile_get(&mut written);
    let descriptor = written.to_string();
    assert!(!descriptor.lines().any(|line| line.starts_with("root-users")));

    let reread = Chroot::from_keyfile(&Keyfile::parse(&descriptor, None).unwrap(), "sid-1", true)
        .unwrap();
    assert!(reread.root_users().is_empty());
    assert_eq!(reread.users(), ["bob"]);
    let userdata = reread.facets().get::<Userdata>().unwrap();
    assert_eq!(userdata.get("setup.note"), Some("x\nroot-users=bob"));
    assert_eq!(reread, session);
}
