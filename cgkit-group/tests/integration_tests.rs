use std::path::PathBuf;
use std::sync::{Arc, Once};

use anyhow::Result;
use cgkit_group::*;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

const MOUNTS: &str = "\
cgroup /cg/cpu cgroup rw,nosuid,nodev,noexec,relatime,cpu,cpuacct 0 0
cgroup /cg/memory cgroup rw,nosuid,nodev,noexec,relatime,memory 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
";

const CGROUPS: &str = "\
#subsys_name\thierarchy\tnum_cgroups\tenabled
cpu\t2\t1\t1
cpuacct\t2\t1\t1
memory\t3\t1\t1
";

fn system() -> Result<(MockBackend, CgroupManager)> {
    init_tracing();

    let backend = MockBackend::new()
        .with_file("/proc/mounts", MOUNTS)
        .with_file("/proc/cgroups", CGROUPS)
        .with_hierarchy(
            "/cg/cpu",
            "tasks",
            &[
                ("cpu.shares", "1024"),
                ("cpu.cfs_quota_us", "-1"),
                ("cpu.rt_runtime_us", "0"),
                ("cpuacct.usage", "0"),
            ],
        )
        .with_read_only_param("/cg/cpu", "cpuacct.stat", "user 0\nsystem 0\n")
        .with_hierarchy(
            "/cg/memory",
            "tasks",
            &[
                ("memory.limit_in_bytes", "9223372036854771712"),
                ("memory.use_hierarchy", "1"),
                ("memory.swappiness", "60"),
            ],
        );

    let manager = CgroupManager::init(Arc::new(backend.clone()), Config::default())?;
    Ok((backend, manager))
}

#[test]
fn test_discovery() -> Result<()> {
    let (_backend, manager) = system()?;
    let table = manager.table();

    assert_eq!(table.mounts().len(), 2);
    assert_eq!(
        table.resolve("cpuacct")?.path(),
        table.resolve("cpu")?.path()
    );
    assert!(!table.is_mounted("blkio"));
    Ok(())
}

#[test]
fn test_modify_then_get_round_trip() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut group = Group::new("db")?;
    group.add_controller(manager.table(), "cpu")?;
    group.add_controller(manager.table(), "memory")?;
    manager.create(&group, true)?;

    let cpu = group.controller_mut("cpu").expect("cpu controller");
    cpu.add_value_uint64("cpu.shares", 512)?;
    cpu.add_value_int64("cpu.cfs_quota_us", 50_000)?;
    let memory = group.controller_mut("memory").expect("memory controller");
    memory.add_value_string("memory.limit_in_bytes", "268435456")?;
    memory.add_value_bool("memory.use_hierarchy", false)?;
    manager.modify(&group)?;

    let mut read_back = group.clone();
    read_back
        .controller_mut("cpu")
        .expect("cpu controller")
        .set_value_uint64("cpu.shares", 1)?;
    manager.get(&mut read_back)?;

    read_back.compare(&group)?;
    let cpu = read_back.controller("cpu").expect("cpu controller");
    assert_eq!(cpu.get_value_uint64("cpu.shares")?, 512);
    assert_eq!(cpu.get_value_int64("cpu.cfs_quota_us")?, 50_000);
    let memory = read_back.controller("memory").expect("memory controller");
    assert_eq!(memory.get_value_string("memory.limit_in_bytes")?, "268435456");
    assert!(!memory.get_value_bool("memory.use_hierarchy")?);
    Ok(())
}

#[test]
fn test_get_fills_empty_controller() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut group = Group::new("web")?;
    group.add_controller(manager.table(), "cpu")?;
    manager.create(&group, true)?;

    manager.get(&mut group)?;
    let cpu = group.controller("cpu").expect("cpu controller");
    assert_eq!(cpu.get_value_string("cpu.shares")?, "1024");
    // Other controllers of the same hierarchy are not picked up.
    assert!(cpu.value("cpuacct.usage").is_none());
    Ok(())
}

#[test]
fn test_get_missing_group() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut group = Group::new("ghost")?;
    group.add_controller(manager.table(), "memory")?;
    let err = manager.get(&mut group).unwrap_err();
    assert!(matches!(err, Error::GroupNotExist { .. }));
    Ok(())
}

#[test]
fn test_create_existing_is_a_hint() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut group = Group::new("svc")?;
    group.add_controller(manager.table(), "cpu")?;

    let first = manager.create(&group, true)?;
    assert_eq!(first.created, vec![PathBuf::from("/cg/cpu/svc")]);

    let second = manager.create(&group, true)?;
    assert!(second.already_existed());

    let err = manager
        .create_with(
            &group,
            CreateOptions {
                ignore_ownership: true,
                exclusive: true,
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::GroupExists { .. }));
    Ok(())
}

#[test]
fn test_create_aborts_on_unknown_parameter() -> Result<()> {
    let (backend, manager) = system()?;

    let mut group = Group::new("bad")?;
    let cpu = group.add_controller(manager.table(), "cpu")?;
    cpu.add_value_uint64("cpu.shares", 100)?;
    cpu.add_value_string("cpu.bogus", "1")?;
    cpu.add_value_int64("cpu.cfs_quota_us", 1000)?;

    let err = manager.create(&group, true).unwrap_err();
    assert!(matches!(err, Error::ValueNotExist { ref name } if name == "cpu.bogus"));

    // No rollback: the directory and the earlier write stay.
    assert!(backend.has_dir("/cg/cpu/bad"));
    assert_eq!(backend.file("/cg/cpu/bad/cpu.shares").as_deref(), Some("100"));
    assert_eq!(backend.file("/cg/cpu/bad/cpu.cfs_quota_us").as_deref(), Some("-1"));
    Ok(())
}

#[test]
fn test_create_applies_ownership() -> Result<()> {
    let (backend, manager) = system()?;

    let mut group = Group::new("users/alice")?;
    group.add_controller(manager.table(), "memory")?;
    group.set_owners(Owners::new(1000, 100, 0, 1000));
    manager.create(&group, false)?;

    assert_eq!(backend.owner_of("/cg/memory/users/alice"), Some((0, 1000)));
    assert_eq!(
        backend.owner_of("/cg/memory/users/alice/memory.swappiness"),
        Some((0, 1000))
    );
    assert_eq!(
        backend.owner_of("/cg/memory/users/alice/tasks"),
        Some((1000, 100))
    );

    let mut read_back = Group::new("users/alice")?;
    read_back.add_controller(manager.table(), "memory")?;
    manager.get(&mut read_back)?;
    assert_eq!(read_back.owners(), group.owners());
    Ok(())
}

#[test]
fn test_create_from_parent_inherits_writable_values() -> Result<()> {
    let (backend, manager) = system()?;
    backend.set_file("/cg/cpu/cpu.shares", "2048");
    backend.set_file("/cg/cpu/cpu.rt_runtime_us", "950000");

    let mut group = Group::new("child")?;
    group
        .add_controller(manager.table(), "cpu")?
        .add_value_uint64("cpu.shares", 300)?;

    manager.create_from_parent(&mut group, true)?;

    assert_eq!(backend.file("/cg/cpu/child/cpu.shares").as_deref(), Some("300"));
    assert_eq!(
        backend.file("/cg/cpu/child/cpu.rt_runtime_us").as_deref(),
        Some("950000")
    );

    let cpu = group.controller("cpu").expect("cpu controller");
    assert_eq!(cpu.get_value_uint64("cpu.shares")?, 300);
    assert_eq!(cpu.get_value_string("cpu.rt_runtime_us")?, "950000");
    Ok(())
}

#[test]
fn test_create_from_parent_without_controllers_inherits_all() -> Result<()> {
    let (backend, manager) = system()?;
    backend.set_file("/cg/cpu/cpu.shares", "2048");
    backend.set_file("/cg/memory/memory.swappiness", "10");

    let mut group = Group::new("child")?;
    let report = manager.create_from_parent(&mut group, true)?;

    assert_eq!(
        report.created,
        vec![PathBuf::from("/cg/cpu/child"), PathBuf::from("/cg/memory/child")]
    );
    assert_eq!(backend.file("/cg/cpu/child/cpu.shares").as_deref(), Some("2048"));
    assert_eq!(
        backend.file("/cg/memory/child/memory.swappiness").as_deref(),
        Some("10")
    );

    let names: Vec<&str> = group.controllers().iter().map(Controller::name).collect();
    assert_eq!(names, ["cpu", "cpuacct", "memory"]);
    assert_eq!(
        group
            .controller("cpu")
            .expect("cpu controller")
            .get_value_string("cpu.shares")?,
        "2048"
    );
    Ok(())
}

#[test]
fn test_create_from_parent_uses_nearest_ancestor() -> Result<()> {
    let (backend, manager) = system()?;

    let mut top = Group::new("a")?;
    top.add_controller(manager.table(), "cpu")?
        .add_value_uint64("cpu.shares", 333)?;
    manager.create(&top, true)?;

    let mut leaf = Group::new("a/b/c")?;
    leaf.add_controller(manager.table(), "cpu")?;
    manager.create_from_parent(&mut leaf, true)?;

    assert_eq!(backend.file("/cg/cpu/a/b/c/cpu.shares").as_deref(), Some("333"));
    // The intermediate group is created with the kernel defaults.
    assert_eq!(backend.file("/cg/cpu/a/b/cpu.shares").as_deref(), Some("1024"));
    assert_eq!(
        leaf.controller("cpu")
            .expect("cpu controller")
            .get_value_uint64("cpu.shares")?,
        333
    );
    Ok(())
}

#[test]
fn test_group_without_controllers_is_rejected() -> Result<()> {
    let (backend, manager) = system()?;
    let mut group = Group::new("plain")?;

    let err = manager.create(&group, true).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
    assert!(!backend.has_dir("/cg/cpu/plain"));

    let err = manager.get(&mut group).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));

    let err = manager.delete(&group, true).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
    Ok(())
}

#[test]
fn test_modify_returns_last_error() -> Result<()> {
    let (backend, manager) = system()?;

    let mut group = Group::new("partial")?;
    group.add_controller(manager.table(), "memory")?;
    manager.create(&group, true)?;
    backend.set_writable("/cg/memory/partial/memory.swappiness", false);

    let memory = group.controller_mut("memory").expect("memory controller");
    memory.add_value_string("memory.nonexistent", "1")?;
    memory.add_value_uint64("memory.swappiness", 10)?;
    memory.add_value_string("memory.limit_in_bytes", "1048576")?;

    let err = manager.modify(&group).unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));
    // Writes after the failures still happened.
    assert_eq!(
        backend.file("/cg/memory/partial/memory.limit_in_bytes").as_deref(),
        Some("1048576")
    );
    Ok(())
}

#[test]
fn test_attach_and_delete_with_migration() -> Result<()> {
    let (backend, manager) = system()?;

    let mut group = Group::new("jobs/one")?;
    group.add_controller(manager.table(), "cpu")?;
    group.add_controller(manager.table(), "memory")?;
    manager.create(&group, true)?;

    let pid = ProcessId::from_raw(4321);
    manager.attach_task(&group, Some(pid))?;
    assert_eq!(manager.tasks(&group, "memory")?, vec![pid]);
    assert_eq!(manager.tasks(&group, "cpuacct")?, vec![pid]);

    let err = manager.delete(&group, false).unwrap_err();
    assert!(matches!(err, Error::NotEmpty { .. }));
    assert!(backend.has_dir("/cg/cpu/jobs/one"));

    manager.delete(&group, true)?;
    assert!(!backend.has_dir("/cg/cpu/jobs/one"));
    assert!(!backend.has_dir("/cg/memory/jobs/one"));
    assert_eq!(backend.tasks("/cg/cpu/jobs"), vec![pid]);
    assert_eq!(backend.tasks("/cg/memory/jobs"), vec![pid]);
    Ok(())
}

#[test]
fn test_delete_refuses_parent_with_children() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut child = Group::new("outer/inner")?;
    child.add_controller(manager.table(), "cpu")?;
    manager.create(&child, true)?;

    let mut outer = Group::new("outer")?;
    outer.add_controller(manager.table(), "cpu")?;
    let err = manager.delete(&outer, true).unwrap_err();
    assert!(matches!(err, Error::NotEmpty { .. }));

    manager.delete(&child, false)?;
    manager.delete(&outer, false)?;

    let err = manager.delete(&outer, false).unwrap_err();
    assert!(matches!(err, Error::GroupNotExist { .. }));
    Ok(())
}

#[test]
fn test_failed_delete_leaves_tasks_in_place() -> Result<()> {
    let (backend, manager) = system()?;

    let mut child = Group::new("p/c")?;
    child.add_controller(manager.table(), "cpu")?;
    manager.create(&child, true)?;

    let mut parent = Group::new("p")?;
    parent.add_controller(manager.table(), "cpu")?;
    let pid = ProcessId::from_raw(55);
    manager.attach_task(&parent, Some(pid))?;

    let err = manager.delete(&parent, true).unwrap_err();
    assert!(matches!(err, Error::NotEmpty { .. }));
    assert_eq!(backend.tasks("/cg/cpu/p"), vec![pid]);
    assert!(backend.tasks("/cg/cpu").is_empty());
    Ok(())
}

#[test]
fn test_unmounted_controller() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut group = Group::new("io")?;
    let err = group.add_controller(manager.table(), "blkio").unwrap_err();
    assert!(matches!(err, Error::SubsystemNotMounted { .. }));

    let err = manager
        .change_by_path("io", ProcessId::from_raw(1), &["blkio"])
        .unwrap_err();
    assert!(matches!(err, Error::SubsystemNotMounted { .. }));
    Ok(())
}

#[test]
fn test_group_model_serializes() -> Result<()> {
    let (_backend, manager) = system()?;

    let mut group = Group::new("/svc//api/")?;
    group
        .add_controller(manager.table(), "memory")?
        .add_value_uint64("memory.swappiness", 0)?;

    let json = serde_json::to_value(&group)?;
    assert_eq!(json["name"], "svc/api");
    assert_eq!(json["controllers"][0]["values"][0]["value"]["type"], "uint64");

    let back: Group = serde_json::from_value(json)?;
    back.compare(&group)?;
    Ok(())
}
