pub mod chat_view;
pub mod main_window;
pub mod sidebar;

use adw::prelude::*;
use adw::Application;
use glib::MainContext;
use gudjob_chat::Settings;
use once_cell::sync::Lazy;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn spawn_async<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    RUNTIME.spawn(fut);
}

pub fn glib_channel<T: Send + 'static>() -> (glib::Sender<T>, glib::Receiver<T>) {
    MainContext::channel(glib::Priority::default())
}

pub fn run_async_to_main<T, E, Fut>(fut: Fut) -> glib::Receiver<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
    Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
{
    let (tx, rx) = glib_channel::<Result<T, E>>();
    spawn_async(async move {
        let res = fut.await;
        let _ = tx.send(res);
    });
    rx
}

pub fn build_ui(app: &Application) {
    let settings = Settings::load();
    match settings.session_user() {
        Some(user) if settings.is_configured() => main_window::show_main_window(app, settings, user),
        _ => show_setup_hint(app),
    }
}

fn show_setup_hint(app: &Application) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("Gudjob")
        .default_width(420)
        .default_height(200)
        .build();
    let path = Settings::toml_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "gudjob.toml".to_string());
    let status = adw::StatusPage::builder()
        .title("Not signed in")
        .description(format!("Add base_url and user_id to {path} and restart."))
        .build();
    let container = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
    container.append(&adw::HeaderBar::new());
    container.append(&status);
    window.set_content(Some(&container));
    window.present();
}
