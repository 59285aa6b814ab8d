use std::cmp::Ordering;
use std::sync::Arc;

use fairshare_queue::app::ResourceRequest;
use fairshare_queue::config::{QueueConfig, SchedulerConfig};
use fairshare_queue::metrics::NoopMetrics;
use fairshare_queue::policy::{PolicyKind, SchedulingPolicy};
use fairshare_queue::queue::{FsQueue, QueueAcl};
use fairshare_queue::resource::Resource;
use fairshare_queue::schedulable::{Schedulable, SchedulableSnapshot};
use fairshare_queue::{Error, FairScheduler};

fn scheduler_with(queues: QueueConfig) -> FairScheduler {
    let config = SchedulerConfig {
        queues,
        ..SchedulerConfig::default()
    };
    FairScheduler::new(config, Arc::new(NoopMetrics)).unwrap()
}

fn two_leaves() -> QueueConfig {
    QueueConfig::parent("root", vec![QueueConfig::leaf("a"), QueueConfig::leaf("b")])
}

#[test]
fn test_parent_demand_is_clamped_sum_of_children() {
    let scheduler = scheduler_with(QueueConfig::parent(
        "root",
        vec![QueueConfig::parent(
            "p",
            vec![
                QueueConfig::leaf("a"),
                QueueConfig::leaf("b"),
                QueueConfig::leaf("c"),
            ],
        )
        .with_max_share(Resource::new(12, 12))],
    ));
    let a = scheduler.submit_app("app_a", "root.p.a", "alice", 0).unwrap();
    a.update_request(ResourceRequest::new(1, Resource::new(10, 1), 1));
    let c = scheduler.submit_app("app_c", "root.p.c", "alice", 0).unwrap();
    c.update_request(ResourceRequest::new(1, Resource::new(5, 1), 1));

    scheduler.update();

    let queues = scheduler.queue_manager();
    assert_eq!(queues.get_queue("root.p.a").unwrap().demand(), Resource::new(10, 1));
    assert_eq!(queues.get_queue("root.p.b").unwrap().demand(), Resource::none());
    assert_eq!(queues.get_queue("root.p.c").unwrap().demand(), Resource::new(5, 1));
    assert_eq!(queues.get_queue("root.p").unwrap().demand(), Resource::new(12, 2));
    assert_eq!(queues.root().demand(), Resource::new(12, 2));
}

#[test]
fn test_childless_parent_has_no_demand_and_assigns_nothing() {
    let scheduler = scheduler_with(QueueConfig::parent(
        "root",
        vec![QueueConfig::parent("empty", Vec::new())],
    ));
    let node = scheduler.add_node("n1", Resource::new(1024, 1));
    scheduler.update();

    let empty = scheduler.queue_manager().get_queue("root.empty").unwrap();
    assert_eq!(empty.demand(), Resource::none());
    assert_eq!(empty.assign_container(&node), Resource::none());
}

#[test]
fn test_recompute_shares_is_idempotent() {
    let scheduler = scheduler_with(two_leaves());
    scheduler.add_node("n1", Resource::new(10_000, 10));
    for (app, queue) in [("app_1", "a"), ("app_2", "a"), ("app_3", "b")] {
        let app = scheduler.submit_app(app, queue, "alice", 0).unwrap();
        app.update_request(ResourceRequest::new(1, Resource::new(1000, 1), 6));
    }
    scheduler.update();

    let shares = |scheduler: &FairScheduler| {
        let mut out: Vec<(String, Resource)> = scheduler
            .queue_manager()
            .queue_names()
            .iter()
            .map(|name| {
                let queue = scheduler.queue_manager().get_queue(name).unwrap();
                (name.clone(), queue.fair_share())
            })
            .collect();
        for app in ["app_1", "app_2", "app_3"] {
            out.push((app.to_string(), scheduler.app(app).unwrap().fair_share()));
        }
        out
    };

    let first = shares(&scheduler);
    scheduler.queue_manager().root().recompute_shares();
    scheduler.queue_manager().root().recompute_shares();
    assert_eq!(shares(&scheduler), first);

    let a = scheduler.queue_manager().get_queue("root.a").unwrap();
    let b = scheduler.queue_manager().get_queue("root.b").unwrap();
    assert_eq!(a.fair_share(), Resource::new(5000, 5));
    assert_eq!(b.fair_share(), Resource::new(5000, 5));
}

#[test]
fn test_comparators_are_transitive() {
    let cluster = Resource::new(10_000, 100);
    let mut entities = Vec::new();
    let mut serial = 0;
    for usage_mb in [0, 500, 2000, 8000] {
        for min_mb in [0, 1000] {
            for weight in [1.0, 3.0] {
                serial += 1;
                let mut snapshot = SchedulableSnapshot::with_usage(
                    &format!("s{serial}"),
                    serial,
                    Resource::new(usage_mb, usage_mb / 100),
                );
                snapshot.min_share = Resource::new(min_mb, 5);
                snapshot.weight = weight;
                snapshot.priority = (serial % 3) as u32;
                entities.push(snapshot);
            }
        }
    }

    for kind in [PolicyKind::Fair, PolicyKind::Drf, PolicyKind::Fifo] {
        let policy: Arc<dyn SchedulingPolicy> = kind.build();
        let cmp = |x: &SchedulableSnapshot, y: &SchedulableSnapshot| policy.compare(x, y, &cluster);
        for a in &entities {
            assert_eq!(cmp(a, a), Ordering::Equal);
            for b in &entities {
                assert_eq!(cmp(a, b), cmp(b, a).reverse(), "{} antisymmetry", policy.name());
                for c in &entities {
                    if cmp(a, b) == Ordering::Less && cmp(b, c) == Ordering::Less {
                        assert_eq!(cmp(a, c), Ordering::Less, "{} transitivity", policy.name());
                    }
                }
            }
        }
    }
}

#[test]
fn test_least_served_queue_gets_next_container() {
    let scheduler = scheduler_with(two_leaves());
    scheduler.add_node("n1", Resource::new(8192, 8));
    let first = scheduler.submit_app("app_a", "a", "alice", 0).unwrap();
    first.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 4));
    scheduler.update();
    scheduler.node_update("n1");
    scheduler.node_update("n1");
    assert_eq!(first.live_containers().len(), 2);

    let second = scheduler.submit_app("app_b", "b", "bob", 0).unwrap();
    second.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 4));
    scheduler.update();
    scheduler.node_update("n1");

    assert_eq!(second.live_containers().len(), 1);
    assert_eq!(first.live_containers().len(), 2);
}

#[test]
fn test_queue_at_max_share_is_skipped() {
    let scheduler = scheduler_with(QueueConfig::parent(
        "root",
        vec![QueueConfig::leaf("capped").with_max_share(Resource::new(2048, 2))],
    ));
    scheduler.add_node("n1", Resource::new(8192, 8));
    let app = scheduler.submit_app("app_1", "capped", "alice", 0).unwrap();
    app.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 5));
    scheduler.update();

    for _ in 0..5 {
        scheduler.node_update("n1");
    }
    assert_eq!(app.live_containers().len(), 2);
}

#[test]
fn test_over_share_queue_yields_newest_container() {
    let scheduler = scheduler_with(two_leaves());
    let node = scheduler.add_node("n1", Resource::new(4096, 4));
    let greedy = scheduler.submit_app("greedy", "a", "alice", 0).unwrap();
    greedy.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 4));
    scheduler.update();
    for _ in 0..4 {
        scheduler.node_update("n1");
    }
    scheduler.update();
    assert!(scheduler.preempt_container().is_none());

    let starved = scheduler.submit_app("starved", "b", "bob", 0).unwrap();
    starved.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 2));
    scheduler.update();

    let newest = greedy.live_containers().iter().map(|c| c.id).max().unwrap();
    let victim = scheduler.preempt_container().unwrap();
    assert_eq!(victim.app_id, "greedy");
    assert_eq!(victim.id, newest);

    scheduler.release_container("greedy", victim.id).unwrap();
    assert_eq!(node.available(), Resource::new(1024, 1));
    assert_eq!(scheduler.node_update("n1"), Resource::new(1024, 1));
    assert_eq!(starved.live_containers().len(), 1);
}

#[test]
fn test_acls_are_inherited_from_ancestors() {
    let scheduler = scheduler_with(
        QueueConfig::parent(
            "root",
            vec![
                QueueConfig::leaf("open").with_submit_acl("*"),
                QueueConfig::leaf("closed"),
            ],
        )
        .with_submit_acl("alice"),
    );

    assert!(scheduler.submit_app("app_1", "closed", "alice", 0).is_ok());
    assert!(scheduler.submit_app("app_2", "open", "bob", 0).is_ok());
    assert!(matches!(
        scheduler.submit_app("app_3", "closed", "bob", 0),
        Err(Error::AccessDenied { .. })
    ));

    let infos = scheduler.queue_user_acl_info("bob");
    let names: Vec<&str> = infos.iter().map(|info| info.queue_name.as_str()).collect();
    assert_eq!(names, vec!["root", "root.open", "root.closed"]);
    assert_eq!(infos[0].user_acls, vec![QueueAcl::AdministerQueue]);
    assert_eq!(
        infos[1].user_acls,
        vec![QueueAcl::SubmitApplications, QueueAcl::AdministerQueue]
    );
}

#[test]
fn test_inapplicable_policy_is_rejected_synchronously() {
    let scheduler = scheduler_with(two_leaves());
    let root = scheduler.queue_manager().root();
    assert!(matches!(
        root.set_policy(PolicyKind::Fifo.build()),
        Err(Error::PolicyNotApplicable { .. })
    ));
    assert_eq!(root.policy().name(), "fair");

    let leaf = scheduler.queue_manager().get_leaf_queue("a", false).unwrap();
    leaf.set_policy(PolicyKind::Fifo.build()).unwrap();
    assert_eq!(leaf.policy().name(), "fifo");
}

#[test]
fn test_max_running_apps_parks_and_promotes() {
    let scheduler = scheduler_with(QueueConfig::parent(
        "root",
        vec![QueueConfig::leaf("small").with_max_running_apps(1)],
    ));
    scheduler.submit_app("app_1", "small", "alice", 0).unwrap();
    scheduler.submit_app("app_2", "small", "alice", 0).unwrap();

    let leaf = scheduler.queue_manager().get_leaf_queue("small", false).unwrap();
    assert_eq!(leaf.num_runnable_apps(), 1);
    assert_eq!(leaf.non_runnable_apps()[0].id(), "app_2");

    scheduler.remove_app("app_1").unwrap();
    assert_eq!(leaf.runnable_apps()[0].id(), "app_2");
    assert!(leaf.non_runnable_apps().is_empty());
}

#[test]
fn test_reload_keeps_queues_that_still_hold_apps() {
    let scheduler = scheduler_with(two_leaves());
    scheduler.submit_app("app_1", "a", "alice", 0).unwrap();

    let mut updated = scheduler_config_without_leaves();
    updated.queues.children.push(QueueConfig::leaf("c"));
    scheduler.reload(updated).unwrap();

    let names = scheduler.queue_manager().queue_names();
    assert_eq!(names, vec!["root", "root.a", "root.c"]);

    scheduler.remove_app("app_1").unwrap();
    scheduler.reload(scheduler_config_without_leaves()).unwrap();
    assert_eq!(scheduler.queue_manager().queue_names(), vec!["root"]);
}

#[test]
fn test_failed_reload_leaves_tree_and_acls_untouched() {
    let scheduler = scheduler_with(QueueConfig::parent("root", vec![QueueConfig::leaf("a")]));
    scheduler.submit_app("app_1", "a", "alice", 0).unwrap();

    // root.a still holds app_1 so it stays a leaf, and root.a.x has nowhere to go.
    let broken = SchedulerConfig {
        queues: QueueConfig::parent(
            "root",
            vec![
                QueueConfig::leaf("b"),
                QueueConfig::parent("a", vec![QueueConfig::leaf("x")]),
            ],
        )
        .with_submit_acl("nobody"),
        ..SchedulerConfig::default()
    };
    assert!(matches!(
        scheduler.reload(broken),
        Err(Error::WrongQueueType { expected: "parent", .. })
    ));

    assert_eq!(scheduler.queue_manager().queue_names(), vec!["root", "root.a"]);
    assert!(scheduler.submit_app("app_2", "a", "alice", 0).is_ok());
}

fn scheduler_config_without_leaves() -> SchedulerConfig {
    SchedulerConfig {
        queues: QueueConfig::parent("root", Vec::new()),
        ..SchedulerConfig::default()
    }
}
