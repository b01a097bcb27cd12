//! Tiny toast helper for session notices.
//! Creates a `#toast-root` container once per page and prepends one div per
//! notice.  Info and success toasts fade out after a few seconds; errors stay
//! until clicked.

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{Document, Element, HtmlElement};

use crate::state::{Notice, NoticeKind};

const AUTO_DISMISS_MS: i32 = 4000;

/// Render `notice`.  `on_dismiss` runs once, when the toast goes away.
pub fn show_notice(notice: &Notice, on_dismiss: impl FnOnce() + 'static) -> Result<(), JsValue> {
    let Some(window) = web_sys::window() else {
        return Ok(());
    };
    let Some(document) = window.document() else {
        return Ok(());
    };

    ensure_styles(&document)?;
    let root = ensure_root(&document)?;

    let toast: HtmlElement = document.create_element("div")?.unchecked_into();
    toast.set_class_name("toast");
    toast.class_list().add_1(kind_class(notice.kind))?;
    toast.set_attribute("data-notice-id", &notice.id.to_string())?;
    toast.set_text_content(Some(&notice.message));

    // Prepend so newest appears on top.
    root.prepend_with_node_1(&toast)?;

    let dismiss = {
        let toast = toast.clone();
        let on_dismiss: RefCell<Option<Box<dyn FnOnce()>>> =
            RefCell::new(Some(Box::new(on_dismiss)));
        Rc::new(move || {
            if let Some(parent) = toast.parent_node() {
                let _ = parent.remove_child(&toast);
            }
            if let Some(cb) = on_dismiss.borrow_mut().take() {
                cb();
            }
        })
    };

    let click = {
        let dismiss = dismiss.clone();
        Closure::once_into_js(move || (*dismiss)())
    };
    toast.set_onclick(Some(click.unchecked_ref()));

    if notice.kind != NoticeKind::Error {
        let timeout = Closure::once_into_js(move || (*dismiss)());
        window.set_timeout_with_callback_and_timeout_and_arguments_0(
            timeout.unchecked_ref(),
            AUTO_DISMISS_MS,
        )?;
    }
    Ok(())
}

fn kind_class(kind: NoticeKind) -> &'static str {
    match kind {
        NoticeKind::Success => "toast-success",
        NoticeKind::Error => "toast-error",
        NoticeKind::Info => "toast-info",
    }
}

fn ensure_root(document: &Document) -> Result<Element, JsValue> {
    if let Some(el) = document.get_element_by_id("toast-root") {
        return Ok(el);
    }
    let root = document.create_element("div")?;
    root.set_id("toast-root");
    root.set_class_name("toast-root");
    let body = document.body().ok_or_else(|| JsValue::from_str("document has no body"))?;
    body.append_child(&root)?;
    Ok(root)
}

fn ensure_styles(document: &Document) -> Result<(), JsValue> {
    if document.get_element_by_id("toast-styles").is_some() {
        return Ok(());
    }

    let css = "
.toast-root{position:fixed;top:16px;right:16px;display:flex;flex-direction:column;gap:8px;
  z-index:9999;font-family:Arial,Helvetica,sans-serif}
.toast{padding:10px 16px;border-radius:4px;color:#fff;box-shadow:0 2px 4px rgba(0,0,0,.1);
  opacity:0;cursor:pointer;animation:toast-in .2s forwards}
.toast-success{background:#16a34a}
.toast-error{background:#dc2626}
.toast-info{background:#2563eb}
@keyframes toast-in{to{opacity:1}}
";

    let style = document.create_element("style")?;
    style.set_id("toast-styles");
    style.set_text_content(Some(css));
    match document.query_selector("head")? {
        Some(head) => head.append_child(&style)?,
        None => {
            let body = document.body().ok_or_else(|| JsValue::from_str("document has no body"))?;
            body.append_child(&style)?
        }
    };
    Ok(())
}
