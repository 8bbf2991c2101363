//! Mock backend example: the whole group lifecycle without a cgroupfs

use std::sync::Arc;

use cgkit_group::{CgroupManager, Group, HierarchyKind, HierarchyTable, MockBackend, MountPoint};
use cgkit_core::ProcessId;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("🧪 Testing with MockBackend (no filesystem required)\n");

    let backend = MockBackend::new()
        .with_hierarchy("/cg/cpu", "tasks", &[("cpu.shares", "1024")])
        .with_hierarchy("/cg/memory", "tasks", &[("memory.limit_in_bytes", "9223372036854771712")]);
    let table = HierarchyTable::new(vec![
        MountPoint::new("/cg/cpu", &["cpu", "cpuacct"], HierarchyKind::V1),
        MountPoint::new("/cg/memory", &["memory"], HierarchyKind::V1),
    ])?;
    let manager = CgroupManager::new(Arc::new(table), Arc::new(backend.clone()));

    let mut group = Group::new("demo/batch")?;
    group
        .add_controller(manager.table(), "cpu")?
        .add_value_uint64("cpu.shares", 256)?;
    group
        .add_controller(manager.table(), "memory")?
        .add_value_string("memory.limit_in_bytes", "536870912")?;

    let report = manager.create(&group, true)?;
    println!("✅ Created: {:?}", report.created);

    for i in 100..103 {
        let pid = ProcessId::from_raw(i);
        manager.attach_task(&group, Some(pid))?;
        println!("✅ Attached process: {pid}");
    }
    println!("\n🔍 Tasks in cpu: {:?}", manager.tasks(&group, "cpu")?);

    manager.get(&mut group)?;
    for controller in group.controllers() {
        for param in controller.values() {
            println!("  {} = {}", param.name, param.value);
        }
    }

    println!("\n📞 Total backend calls: {}", backend.call_count());

    manager.delete(&group, true)?;
    println!("\n✅ Deleted, tasks now in parent: {:?}", backend.tasks("/cg/cpu/demo"));

    Ok(())
}
