use std::{
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use flexstr::SharedStr;
use futures::future;
use glam::DVec3;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use strata_core::{BiomeId, BlockId, BlockPos, ChunkPos, EntityKind, Shape, SubChunkPos};

use super::{
    BlockLookup, BlockSetMode, EntityState, World, WorldError, WorldPlugins, WorldSettings,
    block_registry::{BlockInfo, BlockRegistry, StaticBlockRegistry, basic},
    chunk::{ChunkData, GENERATION_COMPLETE},
    generation::{ChunkGenerator, StageMode, flat::FlatGenerator},
    lighting::NoLight,
    storage::{WorldStorage, memory::MemoryStorage},
    sub_chunk::{BlockEntity, SubChunkData},
    test_support::{
        Event, Failure, FlakyStorage, Recorder, TestGenerator, memory_world, open_world,
        plain_plugins, recording_plugins, runtime, settings,
    },
    tick_schedule::TickKind,
};

const ORIGIN: ChunkPos = ChunkPos::new(0, 0);
const STONE_POS: BlockPos = BlockPos::new(3, -20, 3);
const BEDROCK_POS: BlockPos = BlockPos::new(3, -64, 3);

fn later() -> Instant {
    Instant::now() + Duration::from_secs(1)
}

#[test]
fn concurrent_requests_share_one_load() {
    let runtime = runtime();
    let generator = Arc::new(TestGenerator {
        delay: Duration::from_millis(50),
        ..TestGenerator::default()
    });
    let plugins = WorldPlugins {
        generator: Arc::clone(&generator) as Arc<dyn ChunkGenerator>,
        ..plain_plugins()
    };
    let (world, _storage) = memory_world(&runtime, plugins);

    let first = world.request_chunk_data(ORIGIN);
    let second = world.request_chunk_data(ORIGIN);
    assert_eq!(world.pending_loads(), 1);
    let callers: Vec<_> = (0..4)
        .map(|_| {
            let world = Arc::clone(&world);
            thread::spawn(move || world.request_chunk_data_sync(ORIGIN).unwrap())
        })
        .collect();

    let first = pollster::block_on(first).unwrap();
    let second = pollster::block_on(second).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    for caller in callers {
        assert!(Arc::ptr_eq(&first, &caller.join().unwrap()));
    }
    assert_eq!(generator.generated(), 1);
    assert_eq!(world.pending_loads(), 0);
    assert_eq!(world.resident_chunks(), 1);
    assert!(first.read(ChunkData::is_generated));
}

#[test]
fn weak_requests_never_load_synchronously() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());

    assert!(world.request_chunk_data_weak(ORIGIN).is_none());
    assert!(world.request_chunk_data_weak_gen(ORIGIN).is_none());
    let chunk = world.request_chunk_data_sync(ORIGIN).unwrap();
    assert!(Arc::ptr_eq(
        &chunk,
        &world.request_chunk_data_weak(ORIGIN).unwrap()
    ));

    let (sender, receiver) = std::sync::mpsc::channel();
    world.request_chunk_data_with(ChunkPos::new(4, 4), move |result| {
        sender.send(result.map(|chunk| chunk.pos())).unwrap();
    });
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(10)).unwrap(),
        Ok(ChunkPos::new(4, 4))
    );
}

#[test]
fn failed_loads_reach_every_waiter_and_can_be_retried() {
    let runtime = runtime();
    for failure in [Failure::Error, Failure::Panic] {
        let generator = Arc::new(TestGenerator {
            delay: Duration::from_millis(20),
            failure,
            ..TestGenerator::default()
        });
        let plugins = WorldPlugins {
            generator: Arc::clone(&generator) as Arc<dyn ChunkGenerator>,
            ..plain_plugins()
        };
        let (world, _storage) = memory_world(&runtime, plugins);

        let results = pollster::block_on(future::join(
            world.request_chunk_data(ORIGIN),
            world.request_chunk_data(ORIGIN),
        ));
        for result in [results.0, results.1] {
            assert!(
                matches!(result, Err(WorldError::LoadFailure { pos, .. }) if pos == ORIGIN),
                "{failure:?}"
            );
        }
        assert_eq!(world.resident_chunks(), 0);
        assert_eq!(world.pending_loads(), 0);

        assert!(world.request_chunk_data_sync(ORIGIN).is_err());
        assert_eq!(generator.generated(), 2);
    }
}

#[test]
fn corrupt_records_fail_the_load() {
    let runtime = runtime();
    let (world, storage) = memory_world(&runtime, plain_plugins());
    storage.store_raw(ORIGIN, b"{ not json".to_vec());

    let error = world.request_chunk_data_sync(ORIGIN).unwrap_err();
    assert!(matches!(error, WorldError::LoadFailure { .. }), "{error}");
    assert!(world.request_chunk_data_weak(ORIGIN).is_none());
}

/// Logs which chunk finished or started which stage.
struct StageLogger {
    arrived: Barrier,
    log: Mutex<Vec<(u8, ChunkPos)>>,
}

impl ChunkGenerator for StageLogger {
    fn stage_mode(&self, stage: u8) -> StageMode {
        if stage == 1 {
            StageMode::Sync
        } else {
            StageMode::Parallel
        }
    }

    fn generate_chunk(&self, world: &World, pos: ChunkPos) -> Result<ChunkData> {
        Ok(ChunkData::new(pos, world.layout()))
    }

    fn process_chunk(&self, _world: &World, chunk: &mut ChunkData) -> Result<()> {
        let pos = chunk.pos();
        match chunk.generator_stage() {
            0 => {
                self.arrived.wait();
                chunk.advance_stage(1);
            }
            1 => {
                let delay = pos.x.unsigned_abs() % 4;
                thread::sleep(Duration::from_millis(5 * delay));
                self.log.lock().push((1, pos));
                chunk.advance_stage(2);
            }
            _ => {
                self.log.lock().push((2, pos));
                chunk.advance_stage(GENERATION_COMPLETE);
            }
        }
        Ok(())
    }

    fn generate_sub_chunk(&self, _world: &World, _pos: SubChunkPos) -> Result<SubChunkData> {
        Ok(SubChunkData::empty(BiomeId(0)))
    }
}

#[test]
fn synchronized_stage_completes_everywhere_before_the_next_one() {
    const CHUNKS: usize = 8;
    let runtime = runtime();
    let logger = Arc::new(StageLogger {
        arrived: Barrier::new(CHUNKS),
        log: Mutex::new(Vec::new()),
    });
    let plugins = WorldPlugins {
        generator: Arc::clone(&logger) as Arc<dyn ChunkGenerator>,
        ..plain_plugins()
    };
    let (world, _storage) = memory_world(&runtime, plugins);

    let loads: Vec<_> = (0..CHUNKS)
        .map(|x| world.request_chunk_data(ChunkPos::new(i64::try_from(x).unwrap(), 0)))
        .collect();
    for result in pollster::block_on(future::join_all(loads)) {
        assert!(result.unwrap().read(ChunkData::is_generated));
    }

    let log = logger.log.lock();
    assert_eq!(log.len(), 2 * CHUNKS);
    let last_sync = log.iter().rposition(|(stage, _)| *stage == 1).unwrap();
    let first_after = log.iter().position(|(stage, _)| *stage == 2).unwrap();
    assert!(last_sync < first_after, "{log:?}");
}

#[test]
fn destroying_a_block_reports_in_order() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, _storage) = memory_world(&runtime, recording_plugins(&recorder));
    world.add_observer(Arc::new(recorder.clone()));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world
        .query_for_tick(STONE_POS, 5, 0, TickKind::Block)
        .unwrap();
    recorder.take();

    assert_eq!(world.block(STONE_POS).unwrap(), basic::STONE);
    assert!(
        world
            .set_block(STONE_POS, BlockId::AIR, BlockSetMode::Destroy)
            .unwrap()
    );
    assert_eq!(
        recorder.take(),
        [
            Event::DestroyChange(STONE_POS, basic::STONE),
            Event::Destroyed(STONE_POS, basic::STONE),
            Event::LightUpdate(STONE_POS),
            Event::BlockChange(STONE_POS, BlockId::AIR),
        ]
    );
    assert!(!world.is_queried_for_tick(STONE_POS, TickKind::Block));
    assert_eq!(world.block(STONE_POS).unwrap(), BlockId::AIR);
}

#[test]
fn unbreakable_blocks_are_replaced_silently() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, _storage) = memory_world(&runtime, recording_plugins(&recorder));
    world.add_observer(Arc::new(recorder.clone()));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    recorder.take();

    assert!(
        world
            .set_block(BEDROCK_POS, basic::STONE, BlockSetMode::Destroy)
            .unwrap()
    );
    assert_eq!(
        recorder.take(),
        [
            Event::LightUpdate(BEDROCK_POS),
            Event::BlockChange(BEDROCK_POS, basic::STONE),
        ]
    );
}

#[test]
fn set_block_modes() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();
    let air = BlockPos::new(5, 100, 5);

    // unchanged blocks report no change
    assert!(
        !world
            .set_block(STONE_POS, basic::STONE, BlockSetMode::Replace)
            .unwrap()
    );
    // stone isn't replaceable
    assert!(
        !world
            .set_block(STONE_POS, basic::DIRT, BlockSetMode::Keep)
            .unwrap()
    );
    assert!(world.set_block(air, basic::DIRT, BlockSetMode::Keep).unwrap());
    assert_eq!(world.block(air).unwrap(), basic::DIRT);

    let outside = BlockPos::new(0, 1000, 0);
    assert_eq!(
        world.set_block(outside, basic::DIRT, BlockSetMode::Replace),
        Err(WorldError::OutOfBounds(outside))
    );
    let far = BlockPos::new(1000, 0, 0);
    assert_eq!(
        world.set_block(far, basic::DIRT, BlockSetMode::Replace),
        Err(WorldError::ChunkNotLoaded(far.chunk_pos()))
    );
    assert_eq!(world.get_block(far), None);

    let changed = world
        .set_blocks(
            BlockPos::new(0, 150, 0),
            BlockPos::new(1, 151, 1),
            basic::STONE,
            BlockSetMode::Replace,
        )
        .unwrap();
    assert_eq!(changed, 8);
}

#[test]
fn block_entities_follow_their_block() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, _storage) = memory_world(&runtime, recording_plugins(&recorder));
    world.add_observer(Arc::new(recorder.clone()));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    let chest = BlockEntity {
        kind: strata_core::BlockEntityKind(1),
        payload: serde_json::json!({ "items": [] }),
    };

    world
        .set_block_with_entity(STONE_POS, basic::CHEST, chest.clone(), BlockSetMode::Replace)
        .unwrap();
    assert_eq!(
        world.get_block(STONE_POS),
        Some(BlockLookup::WithEntity(basic::CHEST, chest))
    );

    recorder.take();
    world
        .set_block(STONE_POS, basic::STONE, BlockSetMode::Replace)
        .unwrap();
    assert_eq!(
        world.get_block(STONE_POS),
        Some(BlockLookup::Plain(basic::STONE))
    );
    assert!(
        recorder
            .take()
            .contains(&Event::BlockEntityDestroyed(STONE_POS))
    );
}

#[test]
fn biomes_are_set_per_cell() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();

    assert!(world.set_biome(STONE_POS, BiomeId(9)).unwrap());
    assert!(!world.set_biome(STONE_POS, BiomeId(9)).unwrap());
    // same 4×4×4 cell
    assert_eq!(world.get_biome(BlockPos::new(0, -18, 1)), Some(BiomeId(9)));
    assert_ne!(world.get_biome(BlockPos::new(4, -20, 3)), Some(BiomeId(9)));

    let changed = world
        .set_biomes(BlockPos::new(0, 0, 0), BlockPos::new(7, 3, 3), BiomeId(3))
        .unwrap();
    assert_eq!(changed, 2);
}

#[test]
fn due_ticks_run_exactly_once() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, _storage) = memory_world(&runtime, recording_plugins(&recorder));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world.update_metadata(|metadata| metadata.game_rules.do_random_ticks = false);
    let mut rng = StdRng::seed_from_u64(7);

    world.query_for_tick(STONE_POS, 2, 0, TickKind::Block).unwrap();
    world
        .query_for_tick(BEDROCK_POS, 1, 0, TickKind::Liquid)
        .unwrap();
    assert!(world.is_queried_for_tick(STONE_POS, TickKind::Block));
    assert!(!world.is_queried_for_tick(STONE_POS, TickKind::Liquid));

    let stats = world.tick(&mut rng, Instant::now());
    assert_eq!(stats.scheduled_ticks, 1);
    assert_eq!(
        recorder.take(),
        [Event::ScheduledTick(BEDROCK_POS, TickKind::Liquid)]
    );

    world.tick(&mut rng, Instant::now());
    world.tick(&mut rng, Instant::now());
    assert_eq!(
        recorder.take(),
        [Event::ScheduledTick(STONE_POS, TickKind::Block)]
    );
    assert!(!world.is_queried_for_tick(STONE_POS, TickKind::Block));
    assert_eq!(world.tick_stats().tick, world.current_tick());
}

#[test]
fn failing_tick_handlers_do_not_abort_the_tick() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let plugins = WorldPlugins {
        blocks: Arc::new(super::test_support::RecordingBlocks {
            inner: StaticBlockRegistry::basic(),
            recorder: recorder.clone(),
            failing: Some(STONE_POS),
        }),
        ..plain_plugins()
    };
    let (world, _storage) = memory_world(&runtime, plugins);
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world.update_metadata(|metadata| metadata.game_rules.do_random_ticks = false);
    world.query_for_tick(STONE_POS, 1, 0, TickKind::Block).unwrap();
    world.query_for_tick(BEDROCK_POS, 1, 1, TickKind::Block).unwrap();

    let stats = world.tick(&mut StdRng::seed_from_u64(1), Instant::now());
    assert_eq!(stats.scheduled_ticks, 2);
    assert_eq!(stats.handler_failures, 1);
    assert_eq!(
        recorder.take(),
        [
            Event::ScheduledTick(STONE_POS, TickKind::Block),
            Event::ScheduledTick(BEDROCK_POS, TickKind::Block),
        ]
    );
}

#[test]
fn random_ticks_reach_grass() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, _storage) = memory_world(&runtime, recording_plugins(&recorder));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    recorder.take();

    let mut rng = StdRng::seed_from_u64(3);
    let mut random_ticks = 0;
    for _ in 0..2000 {
        random_ticks += world.tick(&mut rng, Instant::now()).random_ticks;
    }
    assert!(random_ticks > 0);
    let grass_level = 0;
    for event in recorder.take() {
        let Event::RandomTick(pos) = event else {
            continue;
        };
        assert_eq!(pos.0.y, grass_level);
        assert_eq!(world.block(pos).unwrap(), basic::GRASS);
    }
}

#[test]
fn entities_live_in_exactly_one_section() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    for x in 0..2 {
        for z in 0..2 {
            world.request_chunk_data_sync(ChunkPos::new(x, z)).unwrap();
        }
    }
    let entity = world
        .spawn_entity(EntityKind(1), EntityState::at(DVec3::new(8.0, 70.0, 8.0)))
        .unwrap();
    let id = entity.id();

    let sections_holding = || {
        let mut holding = Vec::new();
        world.for_each_chunk(|chunk| {
            chunk.read(|data| {
                for (y_index, section) in data.sections() {
                    if section.entities().contains(&id) {
                        holding.push(data.sub_chunk_pos(y_index));
                    }
                }
            });
        });
        holding
    };

    let mut rng = StdRng::seed_from_u64(11);
    for step in 0..200 {
        let target = DVec3::new(
            rng.random_range(0.0..32.0),
            rng.random_range(-80.0..330.0),
            rng.random_range(0.0..32.0),
        );
        if step % 2 == 0 {
            world.entity_move(id, target).unwrap();
        } else {
            world.entity_teleport(id, target).unwrap();
        }
        let bucket = world.layout().sub_chunk_of_point(target);
        assert_eq!(sections_holding(), [bucket]);
        assert_eq!(world.entity_bucket(id), Some(bucket));
    }

    let before = entity.position();
    assert_eq!(
        world.entity_move(id, DVec3::new(500.0, 70.0, 8.0)),
        Err(WorldError::ChunkNotLoaded(ChunkPos::new(31, 0)))
    );
    assert_eq!(entity.position(), before);
    assert_eq!(sections_holding().len(), 1);

    world.unregister_entity(id).unwrap();
    assert!(sections_holding().is_empty());
    assert_eq!(
        world.unregister_entity(id).unwrap_err(),
        WorldError::UnknownEntity(id)
    );
}

#[test]
fn spatial_queries_visit_each_entity_once() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world.request_chunk_data_sync(ChunkPos::new(1, 0)).unwrap();
    let near = world
        .spawn_entity(EntityKind(1), EntityState::at(DVec3::new(2.0, 10.0, 2.0)))
        .unwrap();
    let far = world
        .spawn_entity(EntityKind(1), EntityState::at(DVec3::new(20.0, 10.0, 2.0)))
        .unwrap();

    let mut seen = Vec::new();
    let count = world.for_each_entity_in_radius(
        DVec3::new(2.0, 10.0, 2.0),
        100.0,
        strata_core::Shape::Spherical,
        |entity| seen.push(entity.id()),
    );
    assert_eq!(count, 2);
    seen.sort();
    let mut expected = vec![near.id(), far.id()];
    expected.sort();
    assert_eq!(seen, expected);

    let count = world.for_each_entity_out_of_radius(
        DVec3::new(2.0, 10.0, 2.0),
        5.0,
        50.0,
        strata_core::Shape::Cubic,
        |entity| assert_eq!(entity.id(), far.id()),
    );
    assert_eq!(count, 1);

    assert_eq!(world.for_each_entity_in_chunk(ORIGIN, |_| {}), 1);
    let section = world.layout().sub_chunk_of_point(near.position());
    assert_eq!(world.for_each_entity_in_sub_chunk(section, |_| {}), 1);
    let bounds = strata_core::Aabb::new(DVec3::new(0.0, 0.0, 0.0), DVec3::new(4.0, 20.0, 4.0));
    assert_eq!(world.for_each_entity_in_bounds(bounds, |_| {}), 1);
}

#[test]
fn tickets_and_references_prevent_eviction() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.add_observer(Arc::new(recorder.clone()));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    let held = world.request_chunk_data_sync(ChunkPos::new(5, 5)).unwrap();
    world.request_chunk_data_sync(ChunkPos::new(9, 9)).unwrap();
    let ticket = world.add_loading_ticket(ORIGIN, 0);

    let mut budget = 10;
    assert!(!world.collect_unused_data(later(), &mut budget));
    assert_eq!(budget, 9);
    assert!(world.request_chunk_data_weak(ORIGIN).is_some());
    assert!(world.request_chunk_data_weak(ChunkPos::new(5, 5)).is_some());
    assert!(world.request_chunk_data_weak(ChunkPos::new(9, 9)).is_none());
    assert!(
        recorder
            .events()
            .contains(&Event::ChunkUnloaded(ChunkPos::new(9, 9)))
    );

    drop(held);
    assert!(world.remove_loading_ticket(&ticket));
    let mut budget = 1;
    world.collect_unused_data(later(), &mut budget);
    assert_eq!(budget, 0);
    assert_eq!(world.resident_chunks(), 1);

    let mut budget = 10;
    world.collect_unused_data(later(), &mut budget);
    world.await_save_chunks().unwrap();
    assert!(world.collect_unused_data(later(), &mut budget));
    assert_eq!(world.resident_chunks(), 0);
}

#[test]
fn held_entities_pin_their_chunk() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();
    let entity = world
        .spawn_entity(EntityKind(2), EntityState::at(DVec3::new(1.0, 5.0, 1.0)))
        .unwrap();

    let mut budget = 10;
    world.collect_unused_data(later(), &mut budget);
    assert_eq!(world.resident_chunks(), 1);

    drop(entity);
    world.collect_unused_data(later(), &mut budget);
    assert_eq!(world.resident_chunks(), 0);
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn evicted_chunks_come_back_from_storage() {
    let runtime = runtime();
    let generator = Arc::new(TestGenerator::default());
    let plugins = WorldPlugins {
        generator: Arc::clone(&generator) as Arc<dyn ChunkGenerator>,
        ..plain_plugins()
    };
    let (world, storage) = memory_world(&runtime, plugins);
    world.request_chunk_data_sync(ORIGIN).unwrap();
    let chest = BlockEntity {
        kind: strata_core::BlockEntityKind(1),
        payload: serde_json::json!({ "lock": "key" }),
    };
    world
        .set_block_with_entity(STONE_POS, basic::CHEST, chest.clone(), BlockSetMode::Replace)
        .unwrap();
    world.query_for_tick(BEDROCK_POS, 40, -3, TickKind::Liquid).unwrap();
    let entity = world
        .spawn_entity(EntityKind(7), EntityState::at(DVec3::new(4.5, 12.0, 4.5)))
        .unwrap();
    drop(entity);

    let mut budget = 10;
    world.collect_unused_data(later(), &mut budget);
    world.await_save_chunks().unwrap();
    assert_eq!(world.resident_chunks(), 0);
    assert_eq!(world.entity_count(), 0);
    assert_eq!(storage.chunk_count(), 1);

    world.request_chunk_data_sync(ORIGIN).unwrap();
    assert_eq!(generator.generated(), 1);
    assert_eq!(
        world.get_block(STONE_POS),
        Some(BlockLookup::WithEntity(basic::CHEST, chest))
    );
    assert!(world.is_queried_for_tick(BEDROCK_POS, TickKind::Liquid));
    assert_eq!(world.entity_count(), 1);
    let mut restored = Vec::new();
    world.for_each_entity_in_chunk(ORIGIN, |entity| restored.push(entity.snapshot()));
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].position, DVec3::new(4.5, 12.0, 4.5));
}

#[test]
fn metadata_survives_reopening() {
    let runtime = runtime();
    let (world, storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world.tick(&mut StdRng::seed_from_u64(5), Instant::now());
    world.tick(&mut StdRng::seed_from_u64(5), Instant::now());
    world.shutdown().unwrap();
    let metadata = world.metadata();
    assert_eq!(metadata.game_time, 2);

    let reopened = open_world(
        &runtime,
        WorldPlugins {
            light: Arc::new(NoLight),
            ..plain_plugins()
        },
        storage as Arc<dyn WorldStorage>,
    );
    assert_eq!(reopened.metadata(), metadata);
    assert_eq!(reopened.current_tick(), 2);
    assert_eq!(reopened.seed().seed(), 42);
}

#[test]
fn callbacks_may_reenter_the_world() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();

    let visited = world.locked(|world| {
        let mut visited = 0;
        world.for_each_chunk(|chunk| {
            visited += 1;
            let pos = chunk.pos().origin(10);
            world
                .set_block(pos, basic::DIRT, BlockSetMode::Replace)
                .unwrap();
        });
        visited
    });
    assert_eq!(visited, 1);
    assert_eq!(world.block(ORIGIN.origin(10)).unwrap(), basic::DIRT);
}

/// Wraps the flat generator and asks for a neighbour while generating the origin.
struct NeighbourRequester {
    inner: FlatGenerator,
    outcome: Mutex<Option<Result<(), WorldError>>>,
}

impl ChunkGenerator for NeighbourRequester {
    fn stage_mode(&self, stage: u8) -> StageMode {
        self.inner.stage_mode(stage)
    }

    fn generate_chunk(&self, world: &World, pos: ChunkPos) -> Result<ChunkData> {
        self.inner.generate_chunk(world, pos)
    }

    fn process_chunk(&self, world: &World, chunk: &mut ChunkData) -> Result<()> {
        if chunk.pos() == ORIGIN && self.outcome.lock().is_none() {
            let outcome = world.request_chunk_data_sync(ChunkPos::new(1, 0)).map(drop);
            *self.outcome.lock() = Some(outcome);
        }
        self.inner.process_chunk(world, chunk)
    }

    fn generate_sub_chunk(&self, world: &World, pos: SubChunkPos) -> Result<SubChunkData> {
        self.inner.generate_sub_chunk(world, pos)
    }
}

#[test]
fn blocking_requests_fail_inside_the_generation_pipeline() {
    let runtime = runtime();
    let generator = Arc::new(NeighbourRequester {
        inner: FlatGenerator::default(),
        outcome: Mutex::new(None),
    });
    let plugins = WorldPlugins {
        generator: Arc::clone(&generator) as Arc<dyn ChunkGenerator>,
        ..plain_plugins()
    };
    let (world, _storage) = memory_world(&runtime, plugins);

    let chunk = world.request_chunk_data_sync(ORIGIN).unwrap();
    assert!(chunk.read(ChunkData::is_generated));
    let outcome = generator.outcome.lock().take();
    assert!(
        matches!(
            outcome,
            Some(Err(WorldError::LoadFailure { pos, .. })) if pos == ChunkPos::new(1, 0)
        ),
        "{outcome:?}"
    );
    // outside of the pipeline the neighbour loads normally
    world.request_chunk_data_sync(ChunkPos::new(1, 0)).unwrap();
}

fn flaky_world(
    runtime: &tokio::runtime::Runtime,
    storage: &Arc<FlakyStorage>,
    plugins: WorldPlugins,
) -> Arc<World> {
    open_world(runtime, plugins, Arc::clone(storage) as Arc<dyn WorldStorage>)
}

#[test]
fn failed_saves_are_reported_and_retried() {
    let runtime = runtime();
    let storage = Arc::new(FlakyStorage::default());
    let world = flaky_world(&runtime, &storage, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world
        .set_block(STONE_POS, basic::DIRT, BlockSetMode::Replace)
        .unwrap();

    storage.set_failing(true);
    assert!(world.save_chunk(ORIGIN).unwrap());
    assert!(matches!(
        world.await_save_chunks(),
        Err(WorldError::Storage(_))
    ));
    let chunk = world.request_chunk_data_weak(ORIGIN).unwrap();
    assert!(chunk.read(ChunkData::is_dirty));
    // each failure is reported once
    assert_eq!(world.await_save_chunks(), Ok(()));

    storage.set_failing(false);
    assert!(world.save_chunk(ORIGIN).unwrap());
    world.await_save_chunks().unwrap();
    assert!(!chunk.read(ChunkData::is_dirty));
    assert_eq!(storage.inner.chunk_count(), 1);
}

#[test]
fn failed_evictions_keep_the_chunk_resident() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let storage = Arc::new(FlakyStorage::default());
    let world = flaky_world(&runtime, &storage, plain_plugins());
    world.add_observer(Arc::new(recorder.clone()));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world
        .set_block(STONE_POS, basic::DIRT, BlockSetMode::Replace)
        .unwrap();

    storage.set_failing(true);
    let mut budget = 10;
    assert!(!world.collect_unused_data(later(), &mut budget));
    assert_eq!(budget, 10);
    assert_eq!(world.resident_chunks(), 1);
    assert!(!recorder.events().contains(&Event::ChunkUnloaded(ORIGIN)));
    assert!(matches!(world.shutdown(), Err(WorldError::Storage(_))));
    assert_eq!(storage.inner.chunk_count(), 0);

    storage.set_failing(false);
    assert!(world.collect_unused_data(later(), &mut budget));
    assert_eq!(budget, 9);
    assert_eq!(world.resident_chunks(), 0);
    world.await_save_chunks().unwrap();
    assert!(recorder.events().contains(&Event::ChunkUnloaded(ORIGIN)));

    world.request_chunk_data_sync(ORIGIN).unwrap();
    assert_eq!(world.block(STONE_POS).unwrap(), basic::DIRT);
}

#[test]
fn newer_saves_are_never_overwritten() {
    let runtime = runtime();
    let storage = Arc::new(FlakyStorage {
        first_store_delay: Duration::from_millis(200),
        ..FlakyStorage::default()
    });
    let world = flaky_world(&runtime, &storage, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();

    for block in [basic::DIRT, basic::GRASS, basic::WATER] {
        world
            .set_block(STONE_POS, block, BlockSetMode::Replace)
            .unwrap();
        assert!(world.save_chunk(ORIGIN).unwrap());
    }
    world.await_save_chunks().unwrap();
    // the slow first write, then only the newest of the queued records
    assert_eq!(storage.inner.chunk_stores(), 2);

    let reopened = flaky_world(&runtime, &storage, plain_plugins());
    reopened.request_chunk_data_sync(ORIGIN).unwrap();
    assert_eq!(reopened.block(STONE_POS).unwrap(), basic::WATER);
}

/// The basic registry with random ticks enabled for every block, air included.
struct RandomTicksEverywhere {
    inner: StaticBlockRegistry,
    recorder: Recorder,
}

impl BlockRegistry for RandomTicksEverywhere {
    fn block_info(&self, block: BlockId) -> BlockInfo {
        BlockInfo {
            random_ticks: true,
            ..self.inner.block_info(block)
        }
    }

    fn random_tick(&self, _world: &World, pos: BlockPos, _block: BlockId) -> Result<()> {
        self.recorder.push(Event::RandomTick(pos));
        Ok(())
    }
}

#[test]
fn random_tick_speed_applies_per_chunk() {
    const SPEED: u32 = 7;
    let runtime = runtime();
    let recorder = Recorder::default();
    let plugins = WorldPlugins {
        blocks: Arc::new(RandomTicksEverywhere {
            inner: StaticBlockRegistry::basic(),
            recorder: recorder.clone(),
        }),
        ..plain_plugins()
    };
    let world = World::open(
        SharedStr::from_borrowed("test"),
        WorldSettings {
            random_tick_speed: SPEED,
            ..settings()
        },
        plugins,
        Arc::new(MemoryStorage::default()),
        runtime.handle().clone(),
    )
    .unwrap();
    let columns = [ORIGIN, ChunkPos::new(1, 0)];
    for pos in columns {
        world.request_chunk_data_sync(pos).unwrap();
    }

    let per_tick = columns.len() * usize::try_from(SPEED).unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    for _ in 0..20 {
        assert_eq!(world.tick(&mut rng, Instant::now()).random_ticks, per_tick);
    }
    let events = recorder.take();
    assert_eq!(events.len(), 20 * per_tick);
    for event in events {
        let Event::RandomTick(pos) = event else {
            panic!("unexpected {event:?}");
        };
        assert!(columns.contains(&pos.chunk_pos()));
        assert!(pos.0.y >= world.layout().min_y() && pos.0.y <= world.layout().max_y());
    }
}

#[test]
fn persisted_load_level_is_lowered_once_generated() {
    let runtime = runtime();
    let recorder = Recorder::default();
    let (world, storage) = memory_world(&runtime, recording_plugins(&recorder));
    world.request_chunk_data_sync(ORIGIN).unwrap();
    world.update_metadata(|metadata| metadata.game_rules.do_random_ticks = false);
    world.query_for_tick(STONE_POS, 1, 0, TickKind::Block).unwrap();
    world.shutdown().unwrap();

    let mut record = storage.load_chunk(ORIGIN).unwrap().unwrap();
    assert_eq!(record.resume_gen_level, 0);
    record.resume_gen_level = 3;
    storage.store_chunk(ORIGIN, &record).unwrap();

    let reopened = open_world(
        &runtime,
        recording_plugins(&recorder),
        Arc::clone(&storage) as Arc<dyn WorldStorage>,
    );
    let chunk = reopened.request_chunk_data_sync(ORIGIN).unwrap();
    assert_eq!(chunk.read(ChunkData::load_level), 0);
    recorder.take();
    reopened.tick(&mut StdRng::seed_from_u64(2), Instant::now());
    assert_eq!(
        recorder.take(),
        [Event::ScheduledTick(STONE_POS, TickKind::Block)]
    );
}

#[test]
fn huge_query_radii_only_visit_resident_columns() {
    let runtime = runtime();
    let (world, _storage) = memory_world(&runtime, plain_plugins());
    world.request_chunk_data_sync(ORIGIN).unwrap();
    let entity = world
        .spawn_entity(EntityKind(1), EntityState::at(DVec3::new(2.0, 10.0, 2.0)))
        .unwrap();

    let count = world.for_each_entity_in_radius(DVec3::ZERO, 1e12, Shape::Cubic, |seen| {
        assert_eq!(seen.id(), entity.id());
    });
    assert_eq!(count, 1);
    let count =
        world.for_each_entity_out_of_radius(DVec3::ZERO, 1.0, 1e15, Shape::Spherical, |_| {});
    assert_eq!(count, 1);
}
