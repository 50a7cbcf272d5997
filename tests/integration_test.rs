use beat::multi_format::{self, EntryOp};
use beat::{apply, archive, binary_diff, binary_patch, create, linear, ChecksumKind, Mode, PatchError};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn beat_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_beat"))
}

fn create_dir_tree(root: &Path, files: &[(&str, &[u8])]) {
    fs::create_dir_all(root).unwrap();
    for (rel_path, content) in files {
        let full = root.join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full, content).unwrap();
    }
}

fn collect_dir_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    collect_recursive(root, root, &mut entries);
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn collect_recursive(root: &Path, current: &Path, entries: &mut Vec<(String, Vec<u8>)>) {
    let mut dir_entries: Vec<_> = fs::read_dir(current).unwrap().collect::<Result<_, _>>().unwrap();
    dir_entries.sort_by_key(|e| e.file_name());

    for entry in dir_entries {
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap().to_str().unwrap().replace('\\', "/");

        if path.is_dir() {
            collect_recursive(root, &path, entries);
        } else {
            let content = fs::read(&path).unwrap();
            entries.push((rel, content));
        }
    }
}

fn relative_paths(root: &Path) -> BTreeSet<String> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| {
            let e = e.unwrap();
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_str()
                .unwrap()
                .replace('\\', "/")
        })
        .collect()
}

fn run(args: &[&str]) -> std::process::Output {
    Command::new(beat_exe())
        .args(args)
        .output()
        .expect("Failed to run beat")
}

fn assert_success(output: &std::process::Output, what: &str) {
    assert!(
        output.status.success(),
        "beat {what} failed:\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_folder_patch_scenario() {
    let temp = TempDir::new().unwrap();
    let (source, target, out) = (
        temp.path().join("source"),
        temp.path().join("target"),
        temp.path().join("out"),
    );
    create_dir_tree(&source, &[("a.txt", b"1"), ("b.txt", b"2")]);
    create_dir_tree(&target, &[("a.txt", b"1"), ("b.txt", b"22"), ("c.txt", b"3")]);

    let patch = temp.path().join("scenario.bpm");
    let summary = create::create_patch(&patch, &source, &target, Mode::Delta, b"").unwrap();
    assert_eq!(summary.files_mirrored, 1);
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files_created, 1);

    apply::apply_patch(&patch, &source, &out).unwrap();
    assert_eq!(collect_dir_tree(&out), collect_dir_tree(&target));
}

#[test]
fn test_entries_cover_union_of_paths() {
    let temp = TempDir::new().unwrap();
    let (source, target) = (temp.path().join("source"), temp.path().join("target"));
    create_dir_tree(
        &source,
        &[
            ("shared/keep.txt", b"same"),
            ("shared/edit.txt", b"version one"),
            ("only_source/deep/x", b"x"),
            ("switch", b"file in source"),
        ],
    );
    create_dir_tree(
        &target,
        &[
            ("shared/keep.txt", b"same"),
            ("shared/edit.txt", b"version two"),
            ("only_target/y", b"y"),
            ("switch/inner", b"now a directory"),
        ],
    );
    fs::create_dir_all(target.join("empty")).unwrap();

    let patch = temp.path().join("p.bpm");
    create::create_patch(&patch, &source, &target, Mode::Linear, b"").unwrap();
    let decoded = multi_format::decode(&fs::read(&patch).unwrap()).unwrap();

    let entry_paths: Vec<&str> = decoded.entries.iter().map(|e| e.path.as_str()).collect();
    let unique: BTreeSet<String> = entry_paths.iter().map(|p| p.to_string()).collect();
    assert_eq!(unique.len(), entry_paths.len(), "duplicate entries: {entry_paths:?}");

    let union: BTreeSet<String> = relative_paths(&source)
        .union(&relative_paths(&target))
        .cloned()
        .collect();
    assert_eq!(unique, union);

    let out = temp.path().join("out");
    apply::apply_patch(&patch, &source, &out).unwrap();
    assert_eq!(collect_dir_tree(&out), collect_dir_tree(&target));
    assert!(out.join("empty").is_dir());
    assert!(!out.join("only_source").exists());
}

#[test]
fn test_renamed_file_is_not_re_embedded() {
    let temp = TempDir::new().unwrap();
    let (source, target) = (temp.path().join("source"), temp.path().join("target"));
    let big = vec![0x5Au8; 64 * 1024];
    create_dir_tree(&source, &[("old_name.bin", &big)]);
    create_dir_tree(&target, &[("renamed/new_name.bin", &big)]);

    let patch = temp.path().join("p.bpm");
    let summary = create::create_patch(&patch, &source, &target, Mode::Linear, b"").unwrap();
    assert_eq!(summary.files_renamed, 1);
    assert!(fs::metadata(&patch).unwrap().len() < 256);

    let decoded = multi_format::decode(&fs::read(&patch).unwrap()).unwrap();
    assert!(decoded.entries.iter().any(|e| matches!(
        &e.op,
        EntryOp::RenameFile { origin, .. } if origin == "old_name.bin"
    )));

    let out = temp.path().join("out");
    apply::apply_patch(&patch, &source, &out).unwrap();
    assert_eq!(collect_dir_tree(&out), collect_dir_tree(&target));
}

#[test]
fn test_wrong_source_file_fails_before_writing() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("source.bin");
    let other = temp.path().join("other.bin");
    let target = temp.path().join("target.bin");
    let output = temp.path().join("output.bin");
    fs::write(&source, b"the real source artifact").unwrap();
    fs::write(&other, b"an unrelated artifact").unwrap();
    fs::write(&target, b"the real target artifact, edited").unwrap();

    let patch = temp.path().join("p.bps");
    fs::write(
        &patch,
        binary_diff::create_file(&source, &target, b"", &Default::default()).unwrap(),
    )
    .unwrap();

    let err = binary_patch::apply_file(&patch, &other, &output).unwrap_err();
    assert!(matches!(
        err,
        PatchError::ChecksumMismatch {
            which: ChecksumKind::Source
        }
    ));
    assert!(!output.exists());

    let applied = binary_patch::apply_file(&patch, &source, &output).unwrap();
    assert_eq!(applied.target, fs::read(&target).unwrap());
    assert_eq!(fs::read(&output).unwrap(), fs::read(&target).unwrap());
}

#[test]
fn test_empty_source_both_modes() {
    let target = b"created from nothing";
    let linear_patch = linear::create(b"", target, b"");
    assert_eq!(linear::apply(&linear_patch, b"").unwrap().target, target);
    let delta_patch = binary_diff::create(b"", target, b"");
    assert_eq!(binary_diff::apply(&delta_patch, b"").unwrap().target, target);
}

#[test]
fn test_cli_file_patch_with_manifest() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("game.rom");
    let target = temp.path().join("game_fixed.rom");
    let manifest = temp.path().join("manifest.xml");
    let patch = temp.path().join("fix.bps");
    let output = temp.path().join("rebuilt.rom");

    let mut rom: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();
    fs::write(&source, &rom).unwrap();
    rom[10_000..10_010].copy_from_slice(b"TRANSLATED");
    fs::write(&target, &rom).unwrap();
    fs::write(&manifest, b"<patch><title>fix</title></patch>").unwrap();

    let out = run(&[
        "create",
        "--source",
        source.to_str().unwrap(),
        "--target",
        target.to_str().unwrap(),
        "--output",
        patch.to_str().unwrap(),
        "--delta",
        "--manifest",
        manifest.to_str().unwrap(),
    ]);
    assert_success(&out, "create");
    assert!(fs::metadata(&patch).unwrap().len() < 200);

    let info = binary_patch::inspect(&fs::read(&patch).unwrap()).unwrap();
    assert_eq!(info.manifest, fs::read(&manifest).unwrap());
    assert_eq!(info.target_size, rom.len());

    let out = run(&[
        "apply",
        "--patch",
        patch.to_str().unwrap(),
        "--source",
        source.to_str().unwrap(),
        "--target",
        output.to_str().unwrap(),
    ]);
    assert_success(&out, "apply");
    assert_eq!(fs::read(&output).unwrap(), rom);
}

#[test]
fn test_cli_folder_patch_cycle() {
    let temp = TempDir::new().unwrap();
    let old_dir = temp.path().join("old");
    let new_dir = temp.path().join("new");
    let target_dir = temp.path().join("target");
    let patch_file = temp.path().join("test.bpm");

    let mut modified_bin = vec![0xAA; 4096];
    modified_bin.extend_from_slice(&[0xBB; 4096]);

    create_dir_tree(
        &old_dir,
        &[
            ("readme.txt", b"Hello, World! This is version 1."),
            ("config/settings.json", b"{\"version\": 1, \"debug\": false}"),
            ("data/records.bin", &vec![0xAA; 8192]),
            ("data/old_file.txt", b"This file will be deleted"),
            ("obsolete/remove_me.txt", b"Going away"),
        ],
    );
    create_dir_tree(
        &new_dir,
        &[
            ("readme.txt", b"Hello, World! This is version 2 with new features."),
            ("config/settings.json", b"{\"version\": 2, \"debug\": true, \"newField\": 42}"),
            ("data/records.bin", &modified_bin),
            ("data/new_file.txt", b"Brand new file in version 2"),
            ("extras/bonus.dat", &vec![0xFF; 1024]),
        ],
    );

    let output = run(&[
        "create-multi",
        "--source",
        old_dir.to_str().unwrap(),
        "--target",
        new_dir.to_str().unwrap(),
        "--output",
        patch_file.to_str().unwrap(),
        "--delta",
    ]);
    assert_success(&output, "create-multi");

    let output = run(&[
        "apply-multi",
        "--patch",
        patch_file.to_str().unwrap(),
        "--source",
        old_dir.to_str().unwrap(),
        "--target",
        target_dir.to_str().unwrap(),
    ]);
    assert_success(&output, "apply-multi");

    assert_eq!(collect_dir_tree(&target_dir), collect_dir_tree(&new_dir));
    assert!(!target_dir.join("data/old_file.txt").exists());
    assert!(!target_dir.join("obsolete").exists());
}

#[test]
fn test_cli_failed_folder_apply_removes_target() {
    let temp = TempDir::new().unwrap();
    let (source, target, out) = (
        temp.path().join("source"),
        temp.path().join("target"),
        temp.path().join("out"),
    );
    create_dir_tree(&source, &[("a.txt", b"first"), ("z.txt", b"last")]);
    create_dir_tree(&target, &[("a.txt", b"first!"), ("z.txt", b"last!")]);
    let patch = temp.path().join("p.bpm");
    create::create_patch(&patch, &source, &target, Mode::Delta, b"").unwrap();

    // a.txt applies, z.txt no longer matches its recorded source.
    fs::write(source.join("z.txt"), b"changed underneath").unwrap();

    let err = apply::apply_patch(&patch, &source, &out).unwrap_err();
    assert!(matches!(err, PatchError::Entry { ref path, .. } if path == "z.txt"));
    assert!(out.join("a.txt").exists(), "the engine itself does not roll back");
    fs::remove_dir_all(&out).unwrap();

    let output = run(&[
        "apply-multi",
        "--patch",
        patch.to_str().unwrap(),
        "--source",
        source.to_str().unwrap(),
        "--target",
        out.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(!out.exists(), "the CLI removes the partially written folder");
}

#[test]
fn test_cli_archive_cycle() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("release");
    let unpacked = temp.path().join("unpacked");
    let bpa = temp.path().join("release.bpa");
    create_dir_tree(
        &source,
        &[("bin/tool", b"\x7fELF...."), ("docs/readme.md", b"# Release")],
    );

    let output = run(&[
        "pack",
        "--source",
        source.to_str().unwrap(),
        "--output",
        bpa.to_str().unwrap(),
    ]);
    assert_success(&output, "pack");

    let output = run(&[
        "unpack",
        "--archive",
        bpa.to_str().unwrap(),
        "--target",
        unpacked.to_str().unwrap(),
    ]);
    assert_success(&output, "unpack");
    assert_eq!(collect_dir_tree(&unpacked), collect_dir_tree(&source));

    let output = run(&["info", bpa.to_str().unwrap()]);
    assert_success(&output, "info");
    let listing = String::from_utf8_lossy(&output.stdout);
    assert!(listing.contains("docs/readme.md (9 bytes)"), "{listing}");
    assert!(listing.contains("Files: 2"), "{listing}");

    let summary = archive::create(&temp.path().join("again.bpa"), &source, b"notes").unwrap();
    assert_eq!(summary.files, 2);
}

#[test]
fn test_cli_refuses_source_as_target() {
    let temp = TempDir::new().unwrap();
    let rom = temp.path().join("game.rom");
    let patch = temp.path().join("fix.bps");
    fs::write(&rom, b"original bytes").unwrap();
    fs::write(&patch, linear::create(b"original bytes", b"patched bytes", b"")).unwrap();

    let output = run(&[
        "apply",
        "--patch",
        patch.to_str().unwrap(),
        "--source",
        rom.to_str().unwrap(),
        "--target",
        rom.to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert_eq!(fs::read(&rom).unwrap(), b"original bytes");

    let output = run(&[
        "create",
        "--source",
        rom.to_str().unwrap(),
        "--target",
        rom.to_str().unwrap(),
        "--output",
        temp.path().join("self.bps").to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(!temp.path().join("self.bps").exists());
}
