//! End-to-end scenarios over the in-memory backend, plus a local-disk
//! round trip.

mod common;

use std::sync::Arc;

use common::*;
use grainfs::{Backend, FsError, GrainFs, LocalBackend, MemoryBackend};

#[test]
fn basic_round_trip() {
    let backend = Arc::new(MemoryBackend::new());
    let fs = GrainFs::mount(backend.clone(), "p").unwrap();

    write_file(&fs, "test.txt", b"Hello, GrainFS!");
    assert_eq!(read_file(&fs, "test.txt"), b"Hello, GrainFS!");

    // The raw backend holds exactly the sidecar plus one obfuscated file,
    // and its bytes are not the plaintext.
    let names = raw_names(backend.as_ref(), ".");
    assert_eq!(names.len(), 2);
    assert!(names.contains(&".grainfs".to_string()));

    let token = names.iter().find(|n| *n != ".grainfs").unwrap();
    assert_ne!(token, "test.txt");
    let raw = raw_bytes(backend.as_ref(), token);
    assert!(!raw.windows(15).any(|w| w == b"Hello, GrainFS!"));
}

#[test]
fn two_files_in_one_directory() {
    let (backend, fs) = mount_memory();

    fs.mkdir_all("d", 0o755).unwrap();
    write_file(&fs, "d/a.txt", b"A");
    write_file(&fs, "d/b.txt", b"B");

    let mut listed: Vec<String> = fs
        .read_dir("d")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    listed.sort();
    assert_eq!(listed, ["a.txt", "b.txt"]);

    // Underneath: the obfuscated directory holds the sidecar plus two
    // distinct URL-base64 tokens within the length cap.
    let obf_dir = raw_non_sidecar(backend.as_ref(), ".")
        .pop()
        .expect("obfuscated directory missing");
    let tokens = raw_non_sidecar(backend.as_ref(), &obf_dir);
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);
    for token in &tokens {
        assert!(token.len() <= 200);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }
    assert_eq!(raw_names(backend.as_ref(), &obf_dir).len(), 3);
}

#[test]
fn rename_moves_content_and_mapping() {
    let (backend, fs) = mount_memory();

    write_file(&fs, "old.txt", b"X");
    fs.rename("old.txt", "new.txt").unwrap();

    assert_eq!(read_file(&fs, "new.txt"), b"X");

    // The root filemap holds exactly one entry, pointing at the new name.
    // (Checked before the stat below: translating a missing path allocates
    // a fresh mapping as a side effect.)
    let filemap = decrypt_filemap(backend.as_ref(), TEST_PASSWORD, ".");
    assert_eq!(filemap.len(), 1);
    assert_eq!(filemap.values().next().unwrap(), "new.txt");

    assert!(fs.stat("old.txt").unwrap_err().is_not_found());
}

#[test]
fn wrong_password_never_reveals_plaintext() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let fs = GrainFs::mount(backend.clone(), "p1").unwrap();
        write_file(&fs, "s.txt", b"S");
    }

    let fs = GrainFs::mount(backend.clone(), "p2").unwrap();
    match fs.open("s.txt") {
        Err(e) => {
            // Either the root filemap fails authentication or the path
            // simply does not resolve under the wrong filename key.
            assert!(
                matches!(e, FsError::AuthFailed { .. }) || e.is_not_found(),
                "unexpected error: {e:?}"
            );
        }
        Ok(file) => {
            let read = file.read_to_end();
            assert!(matches!(read, Err(FsError::AuthFailed { .. })));
        }
    }
}

#[test]
fn random_access_read() {
    let (_backend, fs) = mount_memory();
    write_file(&fs, "r.txt", b"0123456789abcdefghijklmnopqrstuvwxyz");

    let file = fs.open("r.txt").unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(file.read_at(&mut buf, 10).unwrap(), 5);
    assert_eq!(&buf, b"abcde");
    file.close().unwrap();
}

#[test]
fn nested_create_builds_filemap_chain() {
    let (backend, fs) = mount_memory();

    fs.mkdir_all("x/y/z", 0o755).unwrap();
    write_file(&fs, "x/y/z/f.txt", b"F");
    assert_eq!(read_file(&fs, "x/y/z/f.txt"), b"F");

    // Each of the three nested obfuscated directories carries its own
    // filemap sidecar; the innermost also holds the file envelope.
    let mut current = ".".to_string();
    for depth in 0..3 {
        let entries = raw_non_sidecar(backend.as_ref(), &current);
        assert_eq!(entries.len(), 1, "unexpected entries at depth {depth}");
        current = if current == "." {
            entries[0].clone()
        } else {
            format!("{current}/{}", entries[0])
        };
        assert!(backend
            .stat(&format!("{current}/.grainfs/filemap.json"))
            .is_ok());
    }
    assert_eq!(raw_non_sidecar(backend.as_ref(), &current).len(), 1);
}

#[test]
fn second_mount_reads_first_mounts_data() {
    let backend = Arc::new(MemoryBackend::new());
    {
        let fs = GrainFs::mount(backend.clone(), TEST_PASSWORD).unwrap();
        fs.mkdir_all("docs", 0o755).unwrap();
        write_file(&fs, "docs/readme.md", b"# persisted");
    }

    let fs = GrainFs::mount(backend, TEST_PASSWORD).unwrap();
    assert_eq!(read_file(&fs, "docs/readme.md"), b"# persisted");

    let listed: Vec<String> = fs
        .read_dir("docs")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(listed, ["readme.md"]);
}

#[test]
fn read_dir_after_create_lists_exactly_the_basename() {
    let (_backend, fs) = mount_memory();
    fs.mkdir_all("p", 0o755).unwrap();
    write_file(&fs, "p/only.bin", b"1");

    let listed: Vec<String> = fs
        .read_dir("p")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(listed, ["only.bin"]);
}

#[test]
fn sidecar_is_never_listed() {
    let (_backend, fs) = mount_memory();
    write_file(&fs, "a.txt", b"a");
    fs.mkdir_all("d", 0o755).unwrap();
    write_file(&fs, "d/b.txt", b"b");

    for dir in [".", "d"] {
        for entry in fs.read_dir(dir).unwrap() {
            assert_ne!(entry.name, ".grainfs");
        }
    }
}

#[test]
fn foreign_backend_files_are_skipped_in_listings() {
    let (backend, fs) = mount_memory();
    write_file(&fs, "ours.txt", b"ok");

    // A file dropped onto the backend outside GrainFS has no filemap entry.
    let mut foreign = backend.create("foreign-data").unwrap();
    std::io::Write::write_all(&mut foreign, b"noise").unwrap();
    drop(foreign);

    let listed: Vec<String> = fs
        .read_dir(".")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(listed, ["ours.txt"]);
}

#[test]
fn remove_clears_file_and_mapping() {
    let (backend, fs) = mount_memory();
    write_file(&fs, "gone.txt", b"bye");
    fs.remove("gone.txt").unwrap();

    assert!(fs.read_dir(".").unwrap().is_empty());
    assert!(decrypt_filemap(backend.as_ref(), TEST_PASSWORD, ".").is_empty());
    assert!(fs.stat("gone.txt").unwrap_err().is_not_found());
}

#[test]
fn remove_non_empty_directory_fails() {
    let (_backend, fs) = mount_memory();
    fs.mkdir_all("d", 0o755).unwrap();
    write_file(&fs, "d/f.txt", b"x");

    assert!(fs.remove("d").is_err());

    fs.remove("d/f.txt").unwrap();
    fs.remove("d").unwrap();
    assert!(fs.stat("d").unwrap_err().is_not_found());
}

#[test]
fn rename_across_directories() {
    let (_backend, fs) = mount_memory();
    fs.mkdir_all("src", 0o755).unwrap();
    fs.mkdir_all("dst", 0o755).unwrap();
    write_file(&fs, "src/f.txt", b"moved");

    fs.rename("src/f.txt", "dst/g.txt").unwrap();
    assert_eq!(read_file(&fs, "dst/g.txt"), b"moved");
    assert!(fs.read_dir("src").unwrap().is_empty());
}

#[test]
fn empty_paths_are_invalid() {
    let (_backend, fs) = mount_memory();
    assert!(matches!(fs.open(""), Err(FsError::Invalid { .. })));
    assert!(matches!(fs.create(""), Err(FsError::Invalid { .. })));
    assert!(matches!(fs.remove(""), Err(FsError::Invalid { .. })));
    assert!(matches!(
        fs.rename("", "x"),
        Err(FsError::Invalid { .. })
    ));
}

#[test]
fn oversized_names_are_invalid() {
    let (_backend, fs) = mount_memory();
    let name = "n".repeat(160);
    assert!(matches!(fs.create(&name), Err(FsError::Invalid { .. })));
}

#[test]
fn longest_representable_name_round_trips() {
    let (_backend, fs) = mount_memory();
    // 102 cleartext bytes is the largest name whose token stays within the
    // 200-byte cap.
    let name = "n".repeat(102);
    write_file(&fs, &name, b"edge");
    assert_eq!(read_file(&fs, &name), b"edge");
}

#[test]
fn stat_reports_cleartext_name() {
    let (_backend, fs) = mount_memory();
    fs.mkdir_all("d", 0o755).unwrap();
    write_file(&fs, "d/named.txt", b"data");

    let entry = fs.stat("d/named.txt").unwrap();
    assert_eq!(entry.name, "named.txt");
    assert!(!entry.is_dir);

    let entry = fs.stat("d").unwrap();
    assert_eq!(entry.name, "d");
    assert!(entry.is_dir);
}

#[test]
fn symlink_round_trip() {
    let (_backend, fs) = mount_memory();
    write_file(&fs, "target.txt", b"linked");
    fs.symlink("target.txt", "link.txt").unwrap();

    assert_eq!(fs.readlink("link.txt").unwrap(), "target.txt");
    assert_eq!(read_file(&fs, "link.txt"), b"linked");

    let entry = fs.lstat("link.txt").unwrap();
    assert_eq!(entry.name, "link.txt");
}

#[test]
fn chroot_shares_keys_and_storage() {
    let (_backend, fs) = mount_memory();
    fs.mkdir_all("jail", 0o755).unwrap();

    let jail = fs.chroot("jail").unwrap();
    write_file(&jail, "inner.txt", b"inside");

    // Visible through the parent volume under the full path.
    assert_eq!(read_file(&fs, "jail/inner.txt"), b"inside");
    assert_eq!(jail.root(), "jail");
}

#[test]
fn temp_file_is_unlisted_but_sealed() {
    let (backend, fs) = mount_memory();
    let tmp = fs.temp_file(".", "scratch-").unwrap();
    tmp.write(b"temporary").unwrap();
    tmp.close().unwrap();

    // Temp files are not recorded under cleartext names.
    assert!(fs.read_dir(".").unwrap().is_empty());

    // The raw backend file exists and is an envelope, not plaintext.
    let raw: Vec<String> = raw_non_sidecar(backend.as_ref(), ".");
    assert_eq!(raw.len(), 1);
    assert!(raw[0].starts_with("scratch-"));
    let bytes = raw_bytes(backend.as_ref(), &raw[0]);
    assert!(!bytes.windows(9).any(|w| w == b"temporary"));
}

#[test]
fn empty_file_round_trips() {
    let (_backend, fs) = mount_memory();
    let file = fs.create("empty").unwrap();
    file.write(b"").unwrap();
    file.close().unwrap();

    let file = fs.open("empty").unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(file.read(&mut buf).unwrap(), 0);
    file.close().unwrap();
}

#[test]
fn overwrite_replaces_content() {
    let (_backend, fs) = mount_memory();
    write_file(&fs, "f.txt", b"first version");
    write_file(&fs, "f.txt", b"second");
    assert_eq!(read_file(&fs, "f.txt"), b"second");

    // Overwriting reuses the deterministic token: still one backend entry.
    let listed = fs.read_dir(".").unwrap();
    assert_eq!(listed.len(), 1);
}

#[test]
fn local_backend_round_trip_and_remount() {
    let dir = tempfile::tempdir().unwrap();
    {
        let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let fs = GrainFs::mount(backend, TEST_PASSWORD).unwrap();
        fs.mkdir_all("a/b", 0o755).unwrap();
        write_file(&fs, "a/b/file.bin", b"bytes on disk");
    }

    // Nothing under the root is stored under its cleartext name.
    let mut saw_cleartext = false;
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        if name == "a" || name == "file.bin" {
            saw_cleartext = true;
        }
    }
    assert!(!saw_cleartext);

    let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
    let fs = GrainFs::mount(backend, TEST_PASSWORD).unwrap();
    assert_eq!(read_file(&fs, "a/b/file.bin"), b"bytes on disk");
}
