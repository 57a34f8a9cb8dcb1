//! Episode loading and playback tests

#[cfg(test)]
mod tests {
    use episode_segmenter::episode::{mesh_name, stage_model_assets};
    use episode_segmenter::player::{camera_mount_transform, PlaybackControl};
    use episode_segmenter::transform::{orientation_from_row_major, TransformTree};
    use episode_segmenter::world::{ObjectSpec, SceneObject};
    use episode_segmenter::{
        Color, ContactPointsList, Episode, EpisodeConfig, EpisodePlayer, Error,
        FileEpisodePlayer, FrameSource, FrameTransform, Link, MemoryWorld, Orientation, Pose,
        Result, SimWorld, TextId, Vec3,
    };
    use parking_lot::Mutex;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const IDENTITY_R: &str = "[1, 0, 0, 0, 1, 0, 0, 0, 1]";

    fn pose_json(t: [f64; 3]) -> String {
        format!(
            r#"[{{ "t": [{}, {}, {}], "R": {} }}]"#,
            t[0], t[1], t[2], IDENTITY_R
        )
    }

    fn fast_config() -> EpisodeConfig {
        EpisodeConfig {
            time_between_frames_ms: 0,
            ..EpisodeConfig::default()
        }
    }

    fn play(world: &Arc<MemoryWorld>, json: &str, config: EpisodeConfig) -> Result<()> {
        let episode = Episode::from_json(json, &config.scene_id, "episode.json")?;
        FileEpisodePlayer::from_episode(world.clone(), episode, config)
            .into_player()
            .run()
    }

    fn world() -> Arc<MemoryWorld> {
        Arc::new(MemoryWorld::new("map", std::env::temp_dir()))
    }

    fn assert_vec_close(actual: Vec3, expected: Vec3) {
        assert!(
            actual.distance(expected) < 1e-9,
            "{actual} != {expected}"
        );
    }

    // -----------------------------------------------------------------------
    // Episode parsing
    // -----------------------------------------------------------------------

    #[test]
    fn frames_are_sorted_numerically() {
        let json = format!(
            r#"{{ "1": {{ "10": {{ "7": {p} }}, "2": {{ "7": {p} }}, "-1": {{ "7": {p} }} }} }}"#,
            p = pose_json([0.0, 0.0, 0.0])
        );
        let episode = Episode::from_json(&json, "1", "episode.json").unwrap();
        assert_eq!(episode.frame_ids(), vec![-1, 2, 10]);
        assert_eq!(episode.len(), 3);
    }

    #[test]
    fn missing_scene_is_an_error() {
        let json = format!(r#"{{ "1": {{ "0": {{ "7": {} }} }} }}"#, pose_json([0.0; 3]));
        let err = Episode::from_json(&json, "2", "episode.json").unwrap_err();
        assert!(matches!(err, Error::SceneNotFound { ref scene_id, .. } if scene_id == "2"));
    }

    #[test]
    fn non_integer_frame_id_is_an_error() {
        let json = format!(r#"{{ "1": {{ "first": {{ "7": {} }} }} }}"#, pose_json([0.0; 3]));
        let err = Episode::from_json(&json, "1", "episode.json").unwrap_err();
        assert!(matches!(err, Error::InvalidFrameId(ref id) if id == "first"));
    }

    #[test]
    fn keys_naming_the_same_frame_are_rejected() {
        let json = format!(
            r#"{{ "1": {{ "1": {{ "7": {p} }}, "01": {{ "7": {p} }} }} }}"#,
            p = pose_json([0.0; 3])
        );
        let err = Episode::from_json(&json, "1", "episode.json").unwrap_err();
        assert!(matches!(err, Error::DuplicateFrameId { frame_id: 1, .. }));

        let json = format!(
            r#"{{ "1": {{ " 2": {{ "7": {p} }}, "2": {{ "7": {p} }} }} }}"#,
            p = pose_json([0.0; 3])
        );
        assert!(matches!(
            Episode::from_json(&json, "1", "episode.json"),
            Err(Error::DuplicateFrameId { frame_id: 2, .. })
        ));
    }

    #[test]
    fn empty_pose_list_is_an_error() {
        let json = r#"{ "1": { "0": { "7": [] } } }"#;
        let err = Episode::from_json(json, "1", "episode.json").unwrap_err();
        assert!(matches!(err, Error::MissingPose { frame_id: 0, ref object_id } if object_id == "7"));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let json = r#"{ "1": { "0": { "7": [ { "t": ["1", " 2.5", 3], "R": ["1","0","0","0","1","0","0","0","1"] } ] } } }"#;
        let episode = Episode::from_json(json, "1", "episode.json").unwrap();
        let record = &episode.frame(0).unwrap()["7"][0];
        assert_eq!(record.t, [1.0, 2.5, 3.0]);
        assert!(record.orientation().angle_to(&Orientation::identity()) < 1e-12);
    }

    #[test]
    fn non_numeric_strings_are_rejected() {
        let json = format!(
            r#"{{ "1": {{ "0": {{ "7": [ {{ "t": ["one", 0, 0], "R": {} }} ] }} }} }}"#,
            IDENTITY_R
        );
        assert!(Episode::from_json(&json, "1", "episode.json").is_err());
    }

    #[test]
    fn mesh_names_are_zero_padded() {
        assert_eq!(mesh_name("7", 6, "ply"), "obj_000007.ply");
        assert_eq!(fast_config().mesh_name("123"), "obj_000123.ply");
        assert_eq!(fast_config().object_name("7"), "episode_object_7");
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    #[test]
    fn object_ends_at_last_frame_pose() {
        let world = world();
        let json = format!(
            r#"{{ "1": {{ "1": {{ "7": {} }}, "2": {{ "7": {} }} }} }}"#,
            pose_json([0.0, 0.0, 0.0]),
            pose_json([0.0, 0.0, 1000.0])
        );
        play(&world, &json, fast_config()).unwrap();

        assert_eq!(world.object_names(), vec!["episode_object_7"]);
        let object = world.object("episode_object_7").unwrap();
        // Camera frame z is world y; camera sits 1 m up.
        assert_vec_close(object.pose.position, Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(object.pose.frame, "map");
        assert_eq!(object.mesh, "obj_000007.ply");
        assert_eq!(object.scale, 0.001);
        assert_eq!(world.pose_batch_count(), 1);
    }

    #[test]
    fn first_sighting_creates_at_recorded_pose() {
        let world = world();
        let json = format!(
            r#"{{ "1": {{ "0": {{ "3": {} }} }} }}"#,
            pose_json([1000.0, 0.0, 0.0])
        );
        play(&world, &json, fast_config()).unwrap();

        let object = world.object("episode_object_3").unwrap();
        assert_vec_close(object.pose.position, Vec3::new(1.0, 0.0, 1.0));
        let expected = Orientation::from_euler_angles(-std::f64::consts::FRAC_PI_2, 0.0, 0.0);
        assert!(object.pose.orientation.angle_to(&expected) < 1e-6);
        assert_eq!(world.pose_batch_count(), 0);
    }

    #[test]
    fn existing_objects_move_in_one_batch_per_frame() {
        let world = world();
        let frame = format!(
            r#"{{ "1": {p}, "2": {p} }}"#,
            p = pose_json([0.0, 0.0, 0.0])
        );
        let json = format!(r#"{{ "1": {{ "0": {f}, "1": {f}, "2": {f} }} }}"#, f = frame);
        play(&world, &json, fast_config()).unwrap();

        assert_eq!(world.object_count(), 2);
        assert_eq!(world.pose_batch_count(), 2);
    }

    #[test]
    fn ignored_objects_are_never_created() {
        let world = world();
        let frame = format!(
            r#"{{ "3": {p}, "7": {p} }}"#,
            p = pose_json([0.0, 0.0, 0.0])
        );
        let json = format!(r#"{{ "1": {{ "0": {f}, "1": {f} }} }}"#, f = frame);
        let config = EpisodeConfig {
            ignore_objects: vec!["3".into()],
            ..fast_config()
        };
        play(&world, &json, config).unwrap();

        assert_eq!(world.object_names(), vec!["episode_object_7"]);
    }

    #[test]
    fn remaining_frames_counts_down() {
        let world = world();
        let json = format!(
            r#"{{ "1": {{ "0": {{ "7": {p} }}, "1": {{ "7": {p} }} }} }}"#,
            p = pose_json([0.0; 3])
        );
        let episode = Episode::from_json(&json, "1", "episode.json").unwrap();
        let mut source = FileEpisodePlayer::from_episode(world, episode, fast_config());
        assert_eq!(source.remaining_frames(), Some(2));
        assert!(source.process_next_frame().unwrap());
        assert!(source.process_next_frame().unwrap());
        assert_eq!(source.remaining_frames(), Some(0));
        assert!(!source.process_next_frame().unwrap());
    }

    #[test]
    fn new_loads_file_and_stages_assets() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let models = dir.path().join("custom").join("models");
        fs::create_dir_all(models.join("textures")).unwrap();
        fs::write(models.join("obj_000007.ply"), b"ply").unwrap();
        fs::write(models.join("textures").join("obj_000007.png"), b"png").unwrap();
        fs::write(cache.path().join("obj_000007.ply"), b"stale").unwrap();

        let episode_path = dir.path().join("refined_poses.json");
        fs::write(
            &episode_path,
            format!(r#"{{ "1": {{ "0": {{ "7": {} }} }} }}"#, pose_json([0.0; 3])),
        )
        .unwrap();

        let world = Arc::new(MemoryWorld::new("map", cache.path()));
        let config = EpisodeConfig {
            path: episode_path,
            ..fast_config()
        };
        let player = FileEpisodePlayer::new(world.clone(), config).unwrap();
        player.into_player().run().unwrap();

        assert_eq!(fs::read(cache.path().join("obj_000007.ply")).unwrap(), b"ply");
        assert!(cache.path().join("textures").join("obj_000007.png").is_file());
        assert!(world.has_object("episode_object_7"));
    }

    #[test]
    fn missing_models_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let copied = stage_model_assets(&dir.path().join("custom/models"), cache.path()).unwrap();
        assert_eq!(copied, 0);
    }

    #[test]
    fn missing_episode_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = EpisodeConfig {
            path: dir.path().join("nope.json"),
            ..fast_config()
        };
        let result = FileEpisodePlayer::new(world(), config);
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    struct CountingSource {
        processed: Arc<AtomicU64>,
        limit: u64,
    }

    impl FrameSource for CountingSource {
        fn process_next_frame(&mut self) -> Result<bool> {
            if self.processed.load(Ordering::SeqCst) >= self.limit {
                return Ok(false);
            }
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn counting_player(limit: u64) -> (EpisodePlayer<CountingSource>, Arc<AtomicU64>) {
        let processed = Arc::new(AtomicU64::new(0));
        let source = CountingSource {
            processed: processed.clone(),
            limit,
        };
        let control =
            PlaybackControl::new(Duration::from_millis(2)).with_pause_poll(Duration::from_millis(5));
        (EpisodePlayer::with_control(source, control), processed)
    }

    #[test]
    fn pause_stops_frames_and_resume_continues() {
        let (player, processed) = counting_player(u64::MAX);
        let handle = player.start().unwrap();
        assert!(handle.wait_until_ready(Duration::from_secs(5)));

        handle.pause();
        assert!(handle.is_paused());
        // Let the in-flight frame finish.
        thread::sleep(Duration::from_millis(30));
        let frozen = processed.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(processed.load(Ordering::SeqCst), frozen);

        handle.resume();
        thread::sleep(Duration::from_millis(60));
        assert!(processed.load(Ordering::SeqCst) > frozen);

        handle.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn player_runs_source_to_exhaustion() {
        let (player, processed) = counting_player(5);
        let handle = player.start().unwrap();
        let control = handle.control().clone();
        handle.join().unwrap();
        assert_eq!(processed.load(Ordering::SeqCst), 5);
        assert_eq!(control.frames_processed(), 5);
        assert!(control.is_ready());
    }

    #[test]
    fn cancel_while_paused_ends_playback() {
        let (player, _) = counting_player(u64::MAX);
        let control = player.control();
        control.pause();
        let handle = player.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_ready());
        handle.cancel();
        handle.join().unwrap();
        assert_eq!(control.frames_processed(), 0);
    }

    /// Records the x position of every batched pose reset.
    struct RecordingWorld {
        inner: MemoryWorld,
        batches: Mutex<Vec<f64>>,
    }

    impl SimWorld for RecordingWorld {
        fn object_names(&self) -> Vec<String> {
            self.inner.object_names()
        }

        fn object(&self, name: &str) -> Option<SceneObject> {
            self.inner.object(name)
        }

        fn create_object(&self, spec: ObjectSpec) -> Result<()> {
            self.inner.create_object(spec)
        }

        fn reset_object_poses(&self, poses: &[(String, Pose)]) -> Result<()> {
            self.batches
                .lock()
                .extend(poses.iter().map(|(_, p)| p.position.x));
            self.inner.reset_object_poses(poses)
        }

        fn update_transforms(&self, transforms: &[FrameTransform]) {
            self.inner.update_transforms(transforms)
        }

        fn transform_pose(&self, pose: &Pose, target_frame: &str) -> Result<Pose> {
            self.inner.transform_pose(pose, target_frame)
        }

        fn add_text(&self, text: &str, position: Vec3, color: Color, size: f64) -> TextId {
            self.inner.add_text(text, position, color, size)
        }

        fn remove_text(&self, id: TextId) {
            self.inner.remove_text(id)
        }

        fn set_object_color(&self, name: &str, color: Color) -> Result<()> {
            self.inner.set_object_color(name, color)
        }

        fn set_link_color(&self, link: &Link, color: Color) -> Result<()> {
            self.inner.set_link_color(link, color)
        }

        fn cache_dir(&self) -> PathBuf {
            self.inner.cache_dir()
        }

        fn contact_points(&self, object: &str) -> ContactPointsList {
            self.inner.contact_points(object)
        }
    }

    #[test]
    fn paused_file_playback_resumes_at_next_frame() {
        const FRAMES: usize = 40;
        let frames: Vec<String> = (0..FRAMES)
            .map(|i| format!(r#""{i}": {{ "7": {} }}"#, pose_json([i as f64 * 1000.0, 0.0, 0.0])))
            .collect();
        let json = format!(r#"{{ "1": {{ {} }} }}"#, frames.join(", "));
        let episode = Episode::from_json(&json, "1", "episode.json").unwrap();

        let world = Arc::new(RecordingWorld {
            inner: MemoryWorld::new("map", std::env::temp_dir()),
            batches: Mutex::new(Vec::new()),
        });
        let source = FileEpisodePlayer::from_episode(world.clone(), episode, fast_config());
        let control =
            PlaybackControl::new(Duration::from_millis(5)).with_pause_poll(Duration::from_millis(5));
        let handle = EpisodePlayer::with_control(source, control).start().unwrap();
        assert!(handle.wait_until_ready(Duration::from_secs(5)));

        handle.pause();
        thread::sleep(Duration::from_millis(30));
        let frozen = world.batches.lock().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(world.batches.lock().len(), frozen);
        assert!(frozen < FRAMES - 1);

        handle.resume();
        handle.join().unwrap();

        // Frame 0 creates the object; every later frame moves it exactly once.
        let xs: Vec<i64> = world.batches.lock().iter().map(|x| x.round() as i64).collect();
        let expected: Vec<i64> = (1..FRAMES as i64).collect();
        assert_eq!(xs, expected);
        assert_eq!(world.inner.pose_batch_count(), FRAMES as u64 - 1);
    }

    #[test]
    fn frame_rate_is_limited() {
        let processed = Arc::new(AtomicU64::new(0));
        let source = CountingSource {
            processed: processed.clone(),
            limit: 5,
        };
        let started = std::time::Instant::now();
        EpisodePlayer::new(source, Duration::from_millis(20)).run().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    #[test]
    fn rotation_matrix_half_turn_about_z() {
        let q = orientation_from_row_major(&[-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]);
        let rotate = |v: Vec3| Vec3::from(q * v.to_vector());
        assert_vec_close(rotate(Vec3::new(1.0, 0.0, 0.0)), Vec3::new(-1.0, 0.0, 0.0));
        assert_vec_close(rotate(Vec3::new(0.0, 0.0, 1.0)), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn transform_tree_round_trips_through_root() {
        let mut tree = TransformTree::new("map");
        tree.update(camera_mount_transform("map", "camera"));

        let in_camera = Pose::new(Vec3::new(0.2, -0.3, 0.5), Orientation::identity(), "camera");
        let in_map = tree.transform_pose(&in_camera, "map").unwrap();
        let back = tree.transform_pose(&in_map, "camera").unwrap();
        assert!(back.approx_eq(&in_camera, 1e-6));
    }

    #[test]
    fn unknown_frame_is_an_error() {
        let tree = TransformTree::new("map");
        let pose = Pose::new(Vec3::zero(), Orientation::identity(), "nowhere");
        assert!(matches!(
            tree.transform_pose(&pose, "map"),
            Err(Error::UnknownFrame(_))
        ));
    }
}
