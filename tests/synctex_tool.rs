//! `SyncMapper` against a stand-in `synctex` executable.
//!
//! Kept in its own test binary with a single test: writing an executable and
//! spawning it while other threads fork can fail with ETXTBSY.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use syncview::synctex::{PositionResolver, SyncMapper, SyncUnavailable};

fn write_tool(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn test_mapper_runs_tool_and_parses_output() {
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("thesis.pdf");
    let args_log = dir.path().join("args");

    let ok = dir.path().join("synctex-ok");
    write_tool(
        &ok,
        &format!(
            "echo \"$@\" > '{}'\nprintf 'SyncTeX result begin\\nOutput:{}\\nPage:3\\nx:72.0\\ny:120.5\\nSyncTeX result end\\n'",
            args_log.display(),
            doc.display()
        ),
    );
    let mapper = SyncMapper::new(ok.to_string_lossy(), &doc);
    let result = mapper.resolve(42, "ch1.tex").unwrap();
    assert_eq!(result.page, 3);
    assert_eq!(result.y, 120.5);
    let args = fs::read_to_string(&args_log).unwrap();
    assert_eq!(args.trim(), format!("view -i 42:0:ch1.tex -o {}", doc.display()));

    let empty = dir.path().join("synctex-empty");
    write_tool(&empty, "echo 'SyncTeX result begin'");
    let err = SyncMapper::new(empty.to_string_lossy(), &doc).resolve(1, "a.tex").unwrap_err();
    assert!(matches!(err, SyncUnavailable::NoPage));

    let failing = dir.path().join("synctex-fail");
    write_tool(&failing, "exit 2");
    let err = SyncMapper::new(failing.to_string_lossy(), &doc).resolve(1, "a.tex").unwrap_err();
    assert!(matches!(err, SyncUnavailable::Status { .. }));
}
