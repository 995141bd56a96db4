//! End-to-end scenarios exercising the world, queries and change detection
//! together.

use arche_ecs::{EcsError, EdgeKind, Entity, Id, TableId, TypeHooks, World};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Dirty {
    value: bool,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_position_round_trip() {
    init_tracing();
    let mut world = World::new();
    let position = world
        .component_with_hooks::<Position>(TypeHooks::of::<Position>().with_default::<Position>())
        .unwrap();
    let entity = world.create();

    world.add(entity, position).unwrap();
    assert!(world.has(entity, position));
    assert_eq!(world.get::<Position>(entity), Some(&Position::default()));

    world.set(entity, Position { x: 10.0, y: 20.0 }).unwrap();
    assert_eq!(world.get::<Position>(entity), Some(&Position { x: 10.0, y: 20.0 }));

    world.remove(entity, position).unwrap();
    assert!(!world.has(entity, position));
    assert_eq!(world.get::<Position>(entity), None);
}

#[test]
fn test_query_matches_only_entities_with_all_terms() {
    init_tracing();
    let mut world = World::new();
    let moving = world.spawn(Position { x: 0.0, y: 0.0 });
    world.set(moving, Velocity { x: 1.0, y: 2.0 }).unwrap();
    world.spawn(Position { x: 5.0, y: 5.0 });
    world.spawn(Velocity { x: 9.0, y: 9.0 });

    let mut query = world
        .query()
        .with::<Position>()
        .with::<Velocity>()
        .build()
        .unwrap();

    let mut visited = Vec::new();
    let mut it = query.iter(&mut world);
    while it.next() {
        visited.extend_from_slice(it.entities());
        let velocity = it.field::<Velocity>(1).unwrap().to_vec();
        for (p, v) in it.field_mut::<Position>(0).unwrap().iter_mut().zip(velocity) {
            p.x += v.x;
            p.y += v.y;
        }
    }
    drop(it);

    assert_eq!(visited, vec![moving]);
    assert_eq!(world.get::<Position>(moving), Some(&Position { x: 1.0, y: 2.0 }));
}

#[test]
fn test_structural_change_during_iteration_is_deferred() {
    init_tracing();
    let mut world = World::new();
    let velocity = world
        .component_with_hooks::<Velocity>(TypeHooks::of::<Velocity>().with_default::<Velocity>())
        .unwrap();
    let entities: Vec<Entity> = (0..4)
        .map(|i| world.spawn(Position { x: i as f32, y: 0.0 }))
        .collect();

    let mut query = world.query().with::<Position>().build().unwrap();
    let mut visits = 0;
    let mut it = query.iter(&mut world);
    while it.next() {
        let batch = it.entities().to_vec();
        for entity in batch {
            visits += 1;
            it.world().add(entity, velocity).unwrap();
            // The table being iterated is unchanged until the iterator ends.
            assert!(!it.world().has(entity, velocity));
        }
    }
    assert!(it.world().is_deferred());
    drop(it);

    assert_eq!(visits, entities.len());
    assert!(!world.is_deferred());
    for entity in entities {
        assert!(world.has(entity, velocity));
        assert!(world.get::<Position>(entity).is_some());
        assert_eq!(world.get::<Velocity>(entity), Some(&Velocity::default()));
    }
}

#[test]
fn test_add_without_value_needs_constructor() {
    init_tracing();
    let mut world = World::new();
    let boxed = world.component::<Box<u32>>();
    let entity = world.create();

    assert_eq!(
        world.add(entity, boxed),
        Err(EcsError::MissingHook { id: boxed, hook: "ctor" })
    );
    assert!(!world.has(entity, boxed));
    assert_eq!(world.table_of(entity), Some(TableId::ROOT));

    // Supplying a value is fine, and adding an owned id stays a no-op.
    world.set(entity, Box::new(7u32)).unwrap();
    world.add(entity, boxed).unwrap();
    assert_eq!(world.get::<Box<u32>>(entity).map(|b| **b), Some(7));
}

#[test]
fn test_deleting_a_child_of_cycle_terminates() {
    init_tracing();
    let mut world = World::new();
    let a = world.create();
    let b = world.create();
    let c = world.create();
    world.add_pair(a, Entity::CHILD_OF, b).unwrap();
    world.add_pair(b, Entity::CHILD_OF, a).unwrap();
    world.add_pair(c, Entity::CHILD_OF, b).unwrap();
    let bystander = world.spawn(Position { x: 3.0, y: 4.0 });

    assert!(world.delete(a));
    assert!(!world.is_alive(a));
    assert!(!world.is_alive(b));
    assert!(!world.is_alive(c));
    assert!(world.is_alive(bystander));
    assert_eq!(world.entity_count(), 6);
}

#[test]
fn test_defer_end_cannot_close_iterator_scope() {
    init_tracing();
    let mut world = World::new();
    for i in 0..3 {
        world.spawn(Position { x: i as f32, y: 0.0 });
    }

    let mut query = world.query().with::<Position>().build().unwrap();
    let mut it = query.iter(&mut world);
    assert!(it.next());
    let batch = it.entities().to_vec();
    for &entity in &batch {
        it.world().delete(entity);
    }
    it.world().defer_end();

    // The queue is still pending and the current batch is still readable.
    assert!(it.world().is_deferred());
    assert_eq!(it.entities(), &batch[..]);
    assert_eq!(it.field::<Position>(0).unwrap().len(), batch.len());

    // A scope opened inside the iteration closes normally.
    it.world().defer_begin();
    it.world().defer_end();
    assert!(it.world().is_deferred());
    drop(it);

    assert!(!world.is_deferred());
    assert!(batch.iter().all(|&e| !world.is_alive(e)));
}

#[test]
fn test_query_changed_cycle() {
    init_tracing();
    let mut world = World::new();
    world.spawn(Position { x: 0.0, y: 0.0 });
    world.spawn(Position { x: 1.0, y: 0.0 });

    let mut read = world
        .query()
        .with::<Position>()
        .read_only()
        .detect_changes()
        .build()
        .unwrap();
    let mut write = world.query().with::<Position>().build().unwrap();

    assert!(world.query_changed(&read));

    // A partial iteration commits nothing.
    let mut it = read.iter(&mut world);
    assert!(it.next());
    drop(it);
    assert!(world.query_changed(&read));

    let mut it = read.iter(&mut world);
    while it.next() {}
    drop(it);
    assert!(!world.query_changed(&read));

    // Reading through a read-write query does not count as a write.
    let mut it = write.iter(&mut world);
    while it.next() {
        assert_eq!(it.field::<Position>(0).unwrap().len(), 2);
    }
    drop(it);
    assert!(!world.query_changed(&read));

    let mut it = write.iter(&mut world);
    while it.next() {
        for p in it.field_mut::<Position>(0).unwrap() {
            p.y += 1.0;
        }
    }
    drop(it);
    assert!(world.query_changed(&read));

    let mut it = read.iter(&mut world);
    while it.next() {
        assert!(it.changed());
    }
    drop(it);
    assert!(!world.query_changed(&read));
}

#[test]
fn test_prefab_shared_component_through_is_a() {
    init_tracing();
    let mut world = World::new();
    world.component::<Dirty>();
    world.component::<Position>();

    let p1 = world.create();
    world.add(p1, Id::PREFAB).unwrap();
    world.set(p1, Dirty { value: false }).unwrap();
    let p2 = world.create();
    world.add(p2, Id::PREFAB).unwrap();
    world.set(p2, Dirty { value: true }).unwrap();

    let mut instances = Vec::new();
    for prefab in [p1, p1, p2, p2] {
        let instance = world.instantiate(prefab).unwrap();
        world.set(instance, Position { x: 0.0, y: 0.0 }).unwrap();
        instances.push(instance);
    }
    assert_eq!(world.table_of(instances[0]), world.table_of(instances[1]));
    assert_eq!(world.table_of(instances[2]), world.table_of(instances[3]));
    assert_ne!(world.table_of(instances[0]), world.table_of(instances[2]));
    let p2_table = world.table_of(instances[2]).unwrap();

    let mut read = world
        .query()
        .with::<Position>()
        .read_only()
        .detect_changes()
        .build()
        .unwrap();
    let mut write = world
        .query()
        .with::<Dirty>()
        .up(Entity::IS_A)
        .read_only()
        .with::<Position>()
        .build()
        .unwrap();

    let mut it = read.iter(&mut world);
    while it.next() {}
    drop(it);
    assert!(!world.query_changed(&read));

    let mut sources = Vec::new();
    let mut it = write.iter(&mut world);
    while it.next() {
        let dirty = it.field::<Dirty>(0).unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(it.count(), 2);
        sources.push(it.field_src(0).unwrap());
        if !dirty[0].value {
            it.skip();
            continue;
        }
        assert!(it.field_mut::<Dirty>(0).is_none());
        for p in it.field_mut::<Position>(1).unwrap() {
            p.x += 1.0;
        }
    }
    drop(it);
    sources.sort();
    assert_eq!(sources, vec![p1, p2]);

    assert!(world.query_changed(&read));
    let mut changed_tables = Vec::new();
    let mut it = read.iter(&mut world);
    while it.next() {
        if it.changed() {
            changed_tables.push(it.table_id().unwrap());
        }
    }
    drop(it);
    assert_eq!(changed_tables, vec![p2_table]);
    assert!(!world.query_changed(&read));

    assert_eq!(world.get::<Position>(instances[0]), Some(&Position { x: 0.0, y: 0.0 }));
    assert_eq!(world.get::<Position>(instances[3]), Some(&Position { x: 1.0, y: 0.0 }));
    assert_eq!(world.get::<Dirty>(instances[3]), Some(&Dirty { value: true }));
}

#[test]
fn test_graph_edges_are_cached_and_symmetric() {
    init_tracing();
    let mut world = World::new();
    let position = world.component::<Position>();
    let velocity = world.component::<Velocity>();

    let t1 = world.table_add_id(TableId::ROOT, position);
    let t2 = world.table_add_id(t1, velocity);
    assert_eq!(world.table_add_id(t1, position), t1);
    assert_eq!(world.table_remove_id(t2, velocity), t1);
    assert_eq!(world.table_edge(t1, velocity, EdgeKind::Add), Some(t2));
    assert_eq!(world.table_edge(t2, velocity, EdgeKind::Remove), Some(t1));

    // Adding in another order reaches the same table.
    let t3 = world.table_add_id(TableId::ROOT, velocity);
    assert_eq!(world.table_add_id(t3, position), t2);
}

#[test]
fn test_ids_are_unique_among_alive_entities() {
    init_tracing();
    let mut world = World::new();
    let mut alive: Vec<Entity> = (0..64).map(|_| world.create()).collect();
    for entity in alive.drain(..32) {
        world.delete(entity);
        assert!(!world.is_alive(entity));
    }
    for _ in 0..64 {
        let entity = world.create();
        assert!(!alive.contains(&entity));
        alive.push(entity);
    }
    assert!(alive.iter().all(|&e| world.is_alive(e)));
}

#[test]
fn test_two_worlds_are_independent() {
    init_tracing();
    let mut a = World::new();
    let mut b = World::new();

    let ea = a.spawn(Position { x: 1.0, y: 1.0 });
    b.component::<Velocity>();
    let eb = b.spawn(Position { x: 2.0, y: 2.0 });

    assert_ne!(a.component_id::<Position>(), b.component_id::<Position>());
    assert_eq!(a.get::<Position>(ea), Some(&Position { x: 1.0, y: 1.0 }));
    assert_eq!(b.get::<Position>(eb), Some(&Position { x: 2.0, y: 2.0 }));
    assert!(a.component_id::<Velocity>().is_none());

    a.delete(ea);
    assert!(b.is_alive(eb));
}
