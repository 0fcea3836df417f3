mod ui;

use adw::prelude::*;
use adw::Application;

fn main() {
    env_logger::init();
    let app = Application::builder()
        .application_id("io.gudjob.Chat")
        .build();
    app.connect_activate(ui::build_ui);
    app.run();
}
