use std::path::PathBuf;

use garm::config::AcceptorConfig;

#[test]
fn example_config_acceptor_store() -> anyhow::Result<()> {
    let tmpdir = tempfile::tempdir()?;

    let cfg = tmpdir.path().join("config.toml");

    let mut c = AcceptorConfig::example_config();

    // Can not commit config, path not known
    assert!(c.commit().is_err());

    // We can store it to an explicit path though
    c.store(&cfg)?;

    // Storing does not set commitment path
    assert!(c.commit().is_err());

    // We can reload the config now and the configurations
    // are equal if we adjust the commitment path
    let mut c2 = AcceptorConfig::load(&cfg)?;
    c.config_file_path = PathBuf::from(&cfg);
    assert_eq!(c, c2);

    // And this loaded config can now be committed
    c2.detect_replay = false;
    c2.commit()?;

    // And the changes actually made it to disk
    let c3 = AcceptorConfig::load(cfg)?;
    assert_eq!(c2, c3);
    assert_ne!(c, c3);

    Ok(())
}
