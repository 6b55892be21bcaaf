//! App lock tests across several windows
//!
//! Simulates an app with multiple scenes going to the background and
//! coming back, checking that every window's content is swapped for the
//! lock screen and restored exactly once.

use std::sync::{Arc, Mutex};

use latch_core::{
    open, AppLockCoordinator, BiometryKind, CancelToken, Flow, FlowStep, LatchConfig,
    PasscodePrompter, ScriptedAuthenticator, Surface, SurfaceProvider,
};
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq)]
enum View {
    Blank,
    Document(u32),
    LockScreen,
}

struct Scene {
    id: String,
    view: Mutex<View>,
}

impl Scene {
    fn view(&self) -> View {
        self.view.lock().unwrap().clone()
    }
}

impl Surface for Scene {
    type Content = u32;

    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_showing_lock_screen(&self) -> bool {
        self.view() == View::LockScreen
    }

    fn take_content(&self) -> Option<u32> {
        match self.view() {
            View::Document(doc) => Some(doc),
            _ => None,
        }
    }

    fn show_lock_screen(&self) {
        *self.view.lock().unwrap() = View::LockScreen;
    }

    fn restore_content(&self, content: u32) {
        *self.view.lock().unwrap() = View::Document(content);
    }
}

#[derive(Clone, Default)]
struct Scenes(Arc<Mutex<Vec<Arc<Scene>>>>);

impl Scenes {
    fn open(&self, id: &str, view: View) -> Arc<Scene> {
        let scene = Arc::new(Scene {
            id: id.to_string(),
            view: Mutex::new(view),
        });
        self.0.lock().unwrap().push(scene.clone());
        scene
    }

    fn close(&self, id: &str) {
        self.0.lock().unwrap().retain(|scene| scene.id != id);
    }
}

impl SurfaceProvider for Scenes {
    type Surface = Scene;

    fn surfaces(&self) -> Vec<Arc<Scene>> {
        self.0.lock().unwrap().clone()
    }
}

fn coordinator(
    dir: &TempDir,
    auth: Arc<ScriptedAuthenticator>,
    scenes: Scenes,
) -> Arc<AppLockCoordinator<Scenes>> {
    let config = LatchConfig {
        storage_path: dir.path().join("store.json"),
        ..LatchConfig::default()
    };
    let (credentials, gate) = open(&config, auth).unwrap();
    Arc::new(AppLockCoordinator::new(credentials, gate, scenes).unwrap())
}

#[tokio::test]
async fn test_lock_unlock_surface_invariant() {
    for n in [0u32, 1, 3, 8] {
        let dir = TempDir::new().unwrap();
        let scenes = Scenes::default();
        let opened: Vec<_> = (0..n)
            .map(|i| scenes.open(&format!("scene-{}", i), View::Document(i)))
            .collect();
        let blank = scenes.open("blank", View::Blank);

        let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::None));
        let coordinator = coordinator(&dir, auth, scenes);
        coordinator.controller().create("4242").unwrap();

        coordinator.did_enter_background().await;
        assert_eq!(coordinator.session_count().await, n as usize);
        assert!(opened.iter().all(|scene| scene.view() == View::LockScreen));
        assert_eq!(blank.view(), View::Blank);

        assert!(!coordinator.authenticate(Some("0000")).await.unwrap());
        assert_eq!(coordinator.session_count().await, n as usize);

        assert!(coordinator.authenticate(Some("4242")).await.unwrap());
        assert_eq!(coordinator.session_count().await, 0);
        for (i, scene) in opened.iter().enumerate() {
            assert_eq!(scene.view(), View::Document(i as u32));
        }
    }
}

#[tokio::test]
async fn test_identifier_persists_across_launches() {
    let dir = TempDir::new().unwrap();
    let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::None));

    let first = coordinator(&dir, auth.clone(), Scenes::default());
    first.controller().create("9876").unwrap();
    let key = first.controller().key().to_string();

    let second = coordinator(&dir, auth, Scenes::default());
    assert_eq!(second.controller().key(), key);
    assert!(second.controller().is_set());
}

#[tokio::test]
async fn test_closed_scene_does_not_leak_session() {
    let dir = TempDir::new().unwrap();
    let scenes = Scenes::default();
    let main = scenes.open("main", View::Document(1));
    scenes.open("secondary", View::Document(2));

    let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::None));
    let coordinator = coordinator(&dir, auth, scenes.clone());
    coordinator.controller().create("1234").unwrap();

    coordinator.did_enter_background().await;
    scenes.close("secondary");

    assert!(coordinator.authenticate(Some("1234")).await.unwrap());
    assert_eq!(coordinator.session_count().await, 0);
    assert_eq!(main.view(), View::Document(1));
}

#[tokio::test]
async fn test_launch_with_biometrics() {
    let dir = TempDir::new().unwrap();
    let scenes = Scenes::default();
    let main = scenes.open("main", View::Document(7));
    let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::FaceId));
    let coordinator = coordinator(&dir, auth.clone(), scenes);
    coordinator.controller().create("1234").unwrap();

    auth.push_outcome(Ok(true));
    coordinator.controller().biometrics().set_enabled(true).await.unwrap();

    // User dismisses the prompt at launch; the lock screen stays
    auth.push_outcome(Ok(false));
    assert!(!coordinator.did_finish_launching().await);
    assert_eq!(main.view(), View::LockScreen);

    // Face recognized on the next foreground
    coordinator.did_enter_background().await;
    auth.push_outcome(Ok(true));
    assert!(coordinator.will_enter_foreground().await);
    assert_eq!(main.view(), View::Document(7));
}

#[tokio::test]
async fn test_app_controller_lock_screen_unlocks_every_scene() {
    let dir = TempDir::new().unwrap();
    let scenes = Scenes::default();
    let opened: Vec<_> = (0..3)
        .map(|i| scenes.open(&format!("scene-{}", i), View::Document(i)))
        .collect();
    let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::None));
    let coordinator = coordinator(&dir, auth, scenes);
    coordinator.controller().create("4242").unwrap();
    assert!(coordinator.lock().await);

    let mut flow = coordinator.controller().lock_screen().unwrap();
    assert!(flow.submit("4242").await.unwrap().finished);

    assert!(!coordinator.is_locked().await);
    assert_eq!(coordinator.session_count().await, 0);
    for (i, scene) in opened.iter().enumerate() {
        assert_eq!(scene.view(), View::Document(i as u32));
    }
}

struct TypeOnce(Mutex<Option<String>>);

#[async_trait::async_trait]
impl PasscodePrompter for TypeOnce {
    async fn prompt(&self, _step: &FlowStep) -> Option<String> {
        self.0.lock().unwrap().take()
    }
}

#[tokio::test]
async fn test_unlock_flow_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let scenes = Scenes::default();
    let main = scenes.open("main", View::Document(3));
    let auth = Arc::new(ScriptedAuthenticator::new(BiometryKind::None));
    let coordinator = coordinator(&dir, auth, scenes);
    coordinator.controller().create("secret").unwrap();
    coordinator.lock().await;

    let mut flow = coordinator.unlock_flow();
    let typist = TypeOnce(Mutex::new(Some("secret".to_string())));
    let outcome = latch_core::run_flow(&mut flow, &typist, &CancelToken::new())
        .await
        .unwrap();

    assert!(outcome.confirmed);
    assert!(!coordinator.is_locked().await);
    assert_eq!(main.view(), View::Document(3));
}
