use serde_json::{Map, json};

use zipsession::cli::{Command, QueueAction};
use zipsession::store::SESSION_KEY;
use zipsession::zip::{WriteOptions, ZipWriter};
use zipsession::{App, JsonFileStore, KeyValueStore, Restoration, Settings};

fn settings(dir: &std::path::Path) -> Settings {
    Settings {
        state_file: dir.join("state.json"),
        out_dir: dir.join("out"),
        quiet: true,
        ..Settings::default()
    }
}

fn write_zip(path: &std::path::Path, names: &[&str]) {
    let mut writer = ZipWriter::new();
    for name in names {
        writer
            .add_file(name, name.as_bytes(), WriteOptions::deflate(1))
            .unwrap();
    }
    std::fs::write(path, writer.finish().unwrap()).unwrap();
}

#[tokio::test]
async fn each_activation_sees_the_previous_one() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("photos.zip");
    write_zip(&archive, &["a.txt", "b.txt", "c.txt"]);

    let settings = settings(dir.path());
    let mut app = App::activate(settings.clone(), JsonFileStore::new(&settings.state_file)).await;
    app.run(Command::Open {
        source: archive.display().to_string(),
        password: None,
    })
    .await
    .unwrap();
    app.run(Command::Queue {
        action: QueueAction::Remove {
            paths: vec!["b*".into()],
        },
    })
    .await
    .unwrap();
    app.teardown().await;

    let mut app = App::activate(settings.clone(), JsonFileStore::new(&settings.state_file)).await;
    assert_eq!(app.restoration(), &Restoration::Live);
    app.run(Command::Extract { pipe: false }).await.unwrap();
    app.teardown().await;

    let out = dir.path().join("out/photos");
    assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"a.txt");
    assert_eq!(std::fs::read(out.join("c.txt")).unwrap(), b"c.txt");
    assert!(!out.join("b.txt").exists());
}

#[tokio::test]
async fn clear_keeps_foreign_keys() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("x.zip");
    write_zip(&archive, &["one"]);
    let settings = settings(dir.path());

    let store = JsonFileStore::new(&settings.state_file);
    let mut items = Map::new();
    items.insert("theme".to_string(), json!("dark"));
    store.set(items).await.unwrap();

    let mut app = App::activate(settings.clone(), store).await;
    app.run(Command::Open {
        source: archive.display().to_string(),
        password: None,
    })
    .await
    .unwrap();
    app.run(Command::Clear).await.unwrap();
    app.teardown().await;

    let store = JsonFileStore::new(&settings.state_file);
    let stored = store.get(&["theme", SESSION_KEY]).await.unwrap();
    assert_eq!(stored["theme"], json!("dark"));
    assert_eq!(stored[SESSION_KEY]["archiveName"], json!(null));
    assert_eq!(stored[SESSION_KEY]["sourceBytes"], json!(null));

    let app = App::activate(settings.clone(), store).await;
    assert_eq!(app.restoration(), &Restoration::NoRecord);
}
