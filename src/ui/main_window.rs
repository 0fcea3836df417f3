use adw::prelude::*;
use adw::Application;
use gudjob_chat::transport::ws::WsTransport;
use gudjob_chat::{ApiClient, AuthStore, ChatSession, ChatUpdate, LinkState, SessionUser, Settings};
use log::error;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

fn link_label(link: LinkState) -> &'static str {
    match link {
        LinkState::Disconnected => "Offline",
        LinkState::Connecting => "Connecting…",
        LinkState::Connected | LinkState::Subscribed => "Online",
    }
}

fn refresh_sidebar(sidebar: &crate::ui::sidebar::Sidebar, session: &ChatSession) {
    let items = session
        .conversations()
        .into_iter()
        .map(|c| {
            let name = session.counterpart_name(&c.id);
            (c.id, name)
        })
        .collect();
    sidebar.set_items(items);
}

pub fn show_main_window(app: &Application, settings: Settings, user: SessionUser) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("Gudjob")
        .default_width(960)
        .default_height(640)
        .build();

    let overlay = adw::ToastOverlay::new();

    let split = adw::Flap::builder()
        .reveal_flap(true)
        .locked(true)
        .modal(false)
        .build();

    let sidebar = Rc::new(crate::ui::sidebar::Sidebar::new());
    split.set_flap(Some(&sidebar.widget()));

    let chat = Rc::new(crate::ui::chat_view::ChatView::new());
    split.set_content(Some(&chat.widget()));

    overlay.set_child(Some(&split));

    let container = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let title = adw::WindowTitle::new("Gudjob", link_label(LinkState::Disconnected));
    header.set_title_widget(Some(&title));
    container.append(&header);
    container.append(&overlay);
    window.set_content(Some(&container));
    window.present();

    let api = match ApiClient::new(&settings.base_url, settings.token.clone()) {
        Ok(api) => api,
        Err(err) => {
            overlay.add_toast(adw::Toast::new(&format!("Invalid server address: {}", err)));
            return;
        }
    };
    let socket = match settings.socket_endpoint() {
        Ok(url) => url,
        Err(err) => {
            overlay.add_toast(adw::Toast::new(&format!("Invalid live channel address: {}", err)));
            return;
        }
    };

    let me = user.id.clone();
    let identity = Arc::new(AuthStore::new(Some(user)));
    let session_slot: Rc<RefCell<Option<ChatSession>>> = Rc::new(RefCell::new(None));

    {
        let session_slot = session_slot.clone();
        chat.connect_send(move |text| {
            if let Some(session) = session_slot.borrow().clone() {
                crate::ui::spawn_async(async move {
                    session.send(&text).await;
                });
            }
        });
    }
    {
        let session_slot = session_slot.clone();
        sidebar.connect_selected(move |id| {
            if let Some(session) = session_slot.borrow().clone() {
                crate::ui::spawn_async(async move {
                    session.select_conversation(&id).await;
                });
            }
        });
    }
    {
        let session_slot = session_slot.clone();
        window.connect_close_request(move |_| {
            if let Some(session) = session_slot.borrow_mut().take() {
                crate::ui::RUNTIME.block_on(session.unmount());
            }
            gtk4::glib::Propagation::Proceed
        });
    }

    let rx = crate::ui::run_async_to_main(async move {
        let session = ChatSession::mount(Arc::new(api), Arc::new(WsTransport::new(socket)), identity).await;
        Ok::<_, String>(session)
    });
    rx.attach(None, move |res: Result<ChatSession, String>| {
        let session = match res {
            Ok(session) => session,
            Err(err) => {
                error!("conversation page failed to mount: {err}");
                return glib::ControlFlow::Break;
            }
        };
        title.set_subtitle(link_label(session.link_state()));
        refresh_sidebar(&sidebar, &session);
        *session_slot.borrow_mut() = Some(session.clone());

        // forward session updates onto the GTK main loop
        let (tx, updates_rx) = crate::ui::glib_channel::<ChatUpdate>();
        let mut updates = session.subscribe_updates();
        crate::ui::spawn_async(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        if tx.send(update).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        let _ = tx.send(ChatUpdate::Messages);
                        let _ = tx.send(ChatUpdate::Conversations);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let sidebar = sidebar.clone();
        let chat = chat.clone();
        let title = title.clone();
        let me = me.clone();
        updates_rx.attach(None, move |update| {
            match update {
                ChatUpdate::Link(link) => title.set_subtitle(link_label(link)),
                ChatUpdate::Conversations | ChatUpdate::Counterpart(_) => refresh_sidebar(&sidebar, &session),
                ChatUpdate::Messages => chat.render(&session.messages(), Some(&me)),
            }
            glib::ControlFlow::Continue
        });
        glib::ControlFlow::Break
    });
}
