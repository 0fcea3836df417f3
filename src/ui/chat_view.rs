use chrono::Local;
use gtk4::prelude::*;
use gtk4 as gtk;
use gudjob_chat::grouping::{Row, day_label, group_by_day};
use gudjob_chat::{Delivery, Message};

pub struct ChatView {
    root: gtk::Box,
    scroller: gtk::ScrolledWindow,
    messages_box: gtk::Box,
    entry: gtk::Entry,
    send_btn: gtk::Button,
}

impl ChatView {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .build();
        let messages_box = gtk::Box::new(gtk::Orientation::Vertical, 6);
        scroller.set_child(Some(&messages_box));
        root.append(&scroller);

        // Input row
        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some("Type a message…"));
        let send_btn = gtk::Button::with_label("Send");
        input_row.append(&entry);
        input_row.append(&send_btn);
        root.append(&input_row);

        Self { root, scroller, messages_box, entry, send_btn }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    /// Calls `f` with the entry text on click or Enter, then clears the entry.
    /// Blank input is ignored.
    pub fn connect_send<F: Fn(String) + 'static>(&self, f: F) {
        use std::rc::Rc;
        let entry_for_send = self.entry.clone();
        let send: Rc<dyn Fn()> = Rc::new(move || {
            let text = entry_for_send.text().to_string();
            if text.trim().is_empty() {
                return;
            }
            entry_for_send.set_text("");
            f(text);
        });
        {
            let send = send.clone();
            self.send_btn.connect_clicked(move |_| (send)());
        }
        {
            let send = send.clone();
            self.entry.connect_activate(move |_| (send)());
        }
    }

    pub fn render(&self, messages: &[Message], me: Option<&str>) {
        while let Some(child) = self.messages_box.first_child() {
            self.messages_box.remove(&child);
        }
        let today = Local::now().date_naive();
        for row in group_by_day(messages) {
            match row {
                Row::Day(date) => {
                    let sep = gtk::Label::new(Some(&day_label(date, today)));
                    sep.add_css_class("dim-label");
                    sep.add_css_class("caption-heading");
                    sep.set_halign(gtk::Align::Center);
                    sep.set_margin_top(6);
                    self.messages_box.append(&sep);
                }
                Row::Message(msg) => {
                    let time = msg.created_at.with_timezone(&Local).format("%H:%M");
                    let lbl = gtk::Label::new(Some(&format!("{}  {}", msg.text, time)));
                    lbl.set_wrap(true);
                    let mine = me == Some(msg.sender.as_str());
                    lbl.set_halign(if mine { gtk::Align::End } else { gtk::Align::Start });
                    if msg.delivery == Delivery::Pending {
                        lbl.add_css_class("dim-label");
                    }
                    self.messages_box.append(&lbl);
                }
            }
        }
        let adj = self.scroller.vadjustment();
        adj.set_value(adj.upper());
    }
}
