use std::fs;

use tempfile::tempdir;
use tracer_core::config::ProcessConfig;
use tracer_core::model::MemoryRegion;
use tracer_core::process::{
    arch_name, parse_maps, process_info, shell_join, MemoryRegionSource, ProcMaps, StaticRegions,
};

const MAPS: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/demo
00651000-00652000 rw-p 00051000 08:02 173521      /usr/bin/demo
7f2c4e1b1000-7f2c4e1b3000 rw-p 00000000 00:00 0
7f2c4e1b3000-7f2c4e1d6000 r-xp 00000000 08:02 135522  /lib/x86_64-linux-gnu/ld 2.31.so
7ffd4d0f6000-7ffd4d117000 rw-p 00000000 00:00 0                          [stack]
garbage line
";

#[test]
fn maps_lines_become_named_regions() {
    let regions = parse_maps(MAPS, false);
    assert_eq!(
        regions,
        vec![
            MemoryRegion::new("demo", 0x40_0000, 0x45_2000),
            MemoryRegion::new("demo", 0x65_1000, 0x65_2000),
            MemoryRegion::new("", 0x7f2c_4e1b_1000, 0x7f2c_4e1b_3000),
            MemoryRegion::new("ld 2.31.so", 0x7f2c_4e1b_3000, 0x7f2c_4e1d_6000),
            MemoryRegion::new("[stack]", 0x7ffd_4d0f_6000, 0x7ffd_4d11_7000),
        ]
    );
}

#[test]
fn full_path_mode_keeps_module_paths() {
    let regions = parse_maps(MAPS, true);
    assert_eq!(regions[0].name, "/usr/bin/demo");
    assert_eq!(regions[3].name, "/lib/x86_64-linux-gnu/ld 2.31.so");
    assert_eq!(regions[4].name, "[stack]");
}

#[test]
fn proc_maps_reads_from_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("maps");
    fs::write(&path, MAPS).expect("write maps");

    let source = ProcMaps::from_file(&path);
    assert_eq!(source.path(), path.as_path());
    assert_eq!(source.regions().expect("regions").len(), 5);

    let missing = ProcMaps::from_file(dir.path().join("nope"));
    assert!(missing.regions().is_err());
}

#[test]
fn static_regions_are_returned_as_given() {
    let regions = vec![MemoryRegion::new("blob", 0x1000, 0x2000)];
    let source = StaticRegions(regions.clone());
    assert_eq!(source.regions().expect("regions"), regions);
}

#[cfg(target_os = "linux")]
#[test]
fn current_process_has_regions() {
    let regions = ProcMaps::current().regions().expect("read /proc/self/maps");
    assert!(!regions.is_empty());
}

#[test]
fn args_are_shell_quoted() {
    assert_eq!(shell_join(&["ls", "-la", "/tmp/dir"]), "ls -la /tmp/dir");
    assert_eq!(shell_join(&["echo", "hello world"]), "echo 'hello world'");
    assert_eq!(shell_join(&["it's"]), r#"'it'"'"'s'"#);
    assert_eq!(shell_join(&[""]), "''");
    assert_eq!(shell_join::<&str>(&[]), "");
}

#[test]
fn arch_names_follow_viewer_conventions() {
    assert_eq!(arch_name("x86_64"), "AMD64");
    assert_eq!(arch_name("x86"), "X86");
    assert_eq!(arch_name("aarch64"), "ARM64");
    assert_eq!(arch_name("arm"), "ARM");
    assert_eq!(arch_name("riscv64"), "RISCV64");
}

#[test]
fn process_info_prefers_overrides() {
    let overrides = ProcessConfig {
        program: Some("demo".to_string()),
        arch: Some("ARM64".to_string()),
        args: Some(vec!["--flag".to_string()]),
    };
    let info = process_info(&overrides);
    assert_eq!(info.program, "demo");
    assert_eq!(info.arch, "ARM64");
    assert_eq!(info.args, vec!["--flag".to_string()]);
    assert!(info.tracer_version.starts_with("tracer-core "));

    let defaults = process_info(&ProcessConfig::default());
    assert_eq!(defaults.arch, arch_name(std::env::consts::ARCH));
    assert!(!defaults.program.is_empty());
}
