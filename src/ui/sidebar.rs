use gtk4::prelude::*;
use gtk4 as gtk;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Row ids in display order and the conversation the user last clicked.
#[derive(Debug, Default)]
struct RowIds {
    ids: Vec<String>,
    chosen: Option<String>,
}

impl RowIds {
    /// Swaps in a new id list; returns the row that should stay selected.
    fn replace(&mut self, ids: Vec<String>) -> Option<usize> {
        self.ids = ids;
        let chosen = self.chosen.as_deref()?;
        self.ids.iter().position(|id| id == chosen)
    }

    fn pick(&mut self, index: i32) -> Option<String> {
        let id = usize::try_from(index).ok().and_then(|i| self.ids.get(i)).cloned()?;
        self.chosen = Some(id.clone());
        Some(id)
    }
}

pub struct Sidebar {
    root: gtk::Box,
    list: gtk::ListBox,
    rows: Rc<RefCell<RowIds>>,
    rebuilding: Rc<Cell<bool>>,
}

impl Sidebar {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let title = gtk::Label::new(Some("Conversations"));
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        root.append(&title);

        let list = gtk::ListBox::new();
        list.set_placeholder(Some(&gtk::Label::new(Some("No conversations yet"))));
        root.append(&list);

        Self {
            root,
            list,
            rows: Rc::new(RefCell::new(RowIds::default())),
            rebuilding: Rc::new(Cell::new(false)),
        }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    /// Replaces the rows with `(conversation id, label)` pairs. The row the
    /// user last picked stays highlighted without firing a new selection.
    pub fn set_items(&self, items: Vec<(String, String)>) {
        self.rebuilding.set(true);
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        let mut ids = Vec::with_capacity(items.len());
        for (id, name) in items {
            let row = gtk::ListBoxRow::new();
            let label = gtk::Label::new(Some(&name));
            label.set_margin_top(8);
            label.set_margin_bottom(8);
            label.set_margin_start(8);
            label.set_margin_end(8);
            label.set_halign(gtk::Align::Start);
            row.set_child(Some(&label));
            self.list.append(&row);
            ids.push(id);
        }
        let selected = self.rows.borrow_mut().replace(ids);
        if let Some(idx) = selected {
            self.list.select_row(self.list.row_at_index(idx as i32).as_ref());
        }
        self.rebuilding.set(false);
    }

    pub fn connect_selected<F: Fn(String) + 'static>(&self, f: F) {
        let rows = self.rows.clone();
        let rebuilding = self.rebuilding.clone();
        self.list.connect_row_selected(move |_, row| {
            if rebuilding.get() {
                return;
            }
            let Some(row) = row else { return };
            let id = rows.borrow_mut().pick(row.index());
            if let Some(id) = id {
                f(id);
            }
        });
    }
}
