//! Multiple clients, each with its own connection, against one store file.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use taskvault_core::config::VaultConfig;
use taskvault_core::core::{CoreError, VaultContext};
use taskvault_core::ids::{parse_id, EntityKind};
use taskvault_core::model::NewEntity;
use tempfile::tempdir;

fn patient_config() -> VaultConfig {
    VaultConfig {
        max_allocation_attempts: 50,
        busy_timeout_ms: 2_000,
        ..VaultConfig::default()
    }
}

#[test]
fn two_concurrent_allocations_differ() {
    let dir = tempdir().unwrap();
    let ctx = VaultContext::init(dir.path())
        .unwrap()
        .with_config(patient_config());
    ctx.services().unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let services = ctx.services().unwrap();
                barrier.wait();
                services.allocate(EntityKind::Project).unwrap()
            })
        })
        .collect();

    let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let expected: HashSet<String> = ["PID-001", "PID-002"].into_iter().map(String::from).collect();
    assert_eq!(ids, expected);
}

#[test]
fn many_clients_get_unique_increasing_ids() {
    const CLIENTS: usize = 6;
    const PER_CLIENT: usize = 20;

    let dir = tempdir().unwrap();
    let ctx = VaultContext::init(dir.path())
        .unwrap()
        .with_config(patient_config());
    ctx.services().unwrap();

    let barrier = Arc::new(Barrier::new(CLIENTS));
    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let services = ctx.services().unwrap();
                barrier.wait();
                (0..PER_CLIENT)
                    .map(|_| services.allocate(EntityKind::Task).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        let numbers: Vec<u64> = ids.iter().map(|id| parse_id(id).unwrap().1).collect();
        assert!(numbers.windows(2).all(|w| w[0] < w[1]), "not increasing: {ids:?}");
        all.extend(numbers);
    }

    all.sort_unstable();
    let expected: Vec<u64> = (1..=(CLIENTS * PER_CLIENT) as u64).collect();
    assert_eq!(all, expected);
}

#[test]
fn concurrent_creates_keep_membership() {
    let dir = tempdir().unwrap();
    let ctx = VaultContext::init(dir.path())
        .unwrap()
        .with_config(patient_config());
    let project = ctx
        .services()
        .unwrap()
        .create_entity(NewEntity::project("shared"), "alice")
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let ctx = ctx.clone();
            let project = project.clone();
            thread::spawn(move || {
                let services = ctx.services().unwrap();
                for i in 0..5 {
                    services
                        .create_entity(
                            NewEntity::task(format!("client {n} task {i}")).in_project(&project),
                            "worker",
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let services = ctx.services().unwrap();
    let listed: HashSet<String> = services
        .get(&project)
        .unwrap()
        .unwrap()
        .sub_task_ids()
        .iter()
        .cloned()
        .collect();
    let children: HashSet<String> = services
        .list_child_tasks(&project)
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(listed.len(), 20);
    assert_eq!(listed, children);
}

#[test]
fn allocation_gives_up_when_store_stays_locked() {
    let dir = tempdir().unwrap();
    let ctx = VaultContext::init(dir.path()).unwrap();
    let holder = ctx.services().unwrap();
    holder.allocate(EntityKind::Project).unwrap();

    let impatient = ctx.clone().with_config(VaultConfig {
        max_allocation_attempts: 3,
        busy_timeout_ms: 0,
        ..VaultConfig::default()
    });
    let services = impatient.services().unwrap();

    let tx = holder.store().begin_immediate().unwrap();
    let err = services.allocate(EntityKind::Project).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Allocation {
            kind: EntityKind::Project,
            attempts: 3
        }
    ));
    drop(tx);

    // Nothing was consumed by the failed attempts
    assert_eq!(services.allocate(EntityKind::Project).unwrap(), "PID-002");
}
