// Round-trip tests for the {config, data} capture artifact.

#[cfg(test)]
mod tests {
    use servo_tune::{
        Artifact, CapturedSeries, SampleRecord, TestConfig, TrajectoryConfig,
    };

    fn chirp_config() -> TestConfig {
        let mut config = TestConfig::with_trajectory(TrajectoryConfig::Chirp {
            amplitude: 10.0,
            start_freq: 0.2,
            end_freq: 1.5,
            duration: 6.0,
        });
        config.actuator_id = 33;
        config.gains.kp = 85.0;
        config.gains.kd = 5.0;
        config
    }

    fn sample_series() -> CapturedSeries {
        let mut series = CapturedSeries::new();
        for i in 0..250 {
            let t = i as f64 * 0.01;
            series.push(SampleRecord {
                time_since_start: t,
                position: (t * 1.7).sin() * 9.3,
                commanded_position: (t * 1.7).sin() * 10.0,
                torque: if i % 2 == 0 { Some(t * 0.3) } else { None },
                velocity: None,
                commanded_frequency: Some(0.2 + 0.21 * t),
            });
        }
        series
    }

    #[test]
    fn json_round_trip_preserves_every_sequence() {
        let artifact = Artifact::new(chirp_config(), sample_series());
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: Artifact = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.data.len(), artifact.data.len());
        for (a, b) in artifact.data.iter().zip(parsed.data.iter()) {
            // serde_json emits shortest round-trippable float forms, so the
            // comparison is exact.
            assert_eq!(a.time_since_start, b.time_since_start);
            assert_eq!(a.position, b.position);
            assert_eq!(a.commanded_position, b.commanded_position);
            assert_eq!(a.torque, b.torque);
            assert_eq!(a.commanded_frequency, b.commanded_frequency);
        }
        assert_eq!(parsed.config.actuator_id, 33);
        assert_eq!(parsed.config.trajectory, artifact.config.trajectory);
    }

    #[test]
    fn artifact_rows_use_the_wire_field_names() {
        let artifact = Artifact::new(chirp_config(), sample_series());
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&artifact).unwrap()).unwrap();
        let rows = value["data"].as_array().unwrap();
        let first = &rows[0];
        assert!(first["time_since_start"].is_number());
        assert!(first["position"].is_number());
        assert!(first["commanded_position"].is_number());
        assert!(first["freq"].is_number());
        // Absent optionals are omitted, not null.
        let second = &rows[1];
        assert!(second.get("torque").is_none());
        assert!(value["config"]["gains"]["kp"].is_number());
    }

    #[test]
    fn save_and_load_through_the_dated_directory() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::new(chirp_config(), sample_series());
        let path = artifact.save(dir.path()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("sim_33_"), "unexpected name {name}");
        assert!(name.ends_with(".json"));

        let loaded = Artifact::load(&path).unwrap();
        assert_eq!(loaded.data.len(), artifact.data.len());
        assert_eq!(
            loaded.data.records().last().unwrap().position,
            artifact.data.records().last().unwrap().position
        );
    }
}
