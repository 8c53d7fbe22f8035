// Native command escape hatch
//
// A backend helper can push an opaque payload into a command list without the
// recording layer knowing its shape. At translation time the payload's type
// tag selects a handler from the table the backend registered.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::fatal;

/// Type-erased backend command.
#[derive(Clone)]
pub struct NativeCommand {
    type_tag: TypeId,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl NativeCommand {
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            type_tag: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            payload: Arc::new(payload),
        }
    }

    /// Build from an already shared payload and an explicit tag.
    pub fn from_parts(payload: Arc<dyn Any + Send + Sync>, type_tag: TypeId) -> Self {
        Self {
            type_tag,
            type_name: "<opaque>",
            payload,
        }
    }

    pub fn type_tag(&self) -> TypeId {
        self.type_tag
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCommand")
            .field("type", &self.type_name)
            .finish()
    }
}

type Handler<B> = Box<dyn Fn(&mut B, <B as Backend>::CommandBuffer, &dyn Any)>;

/// Backend-provided dispatch table for native commands.
pub struct NativeTable<B: Backend> {
    handlers: HashMap<TypeId, Handler<B>>,
}

impl<B: Backend> Default for NativeTable<B> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<B: Backend> NativeTable<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any>(&mut self, handler: fn(&mut B, B::CommandBuffer, &T)) {
        let name = std::any::type_name::<T>();
        let erased: Handler<B> = Box::new(
            move |backend: &mut B, cb: B::CommandBuffer, payload: &dyn Any| match payload
                .downcast_ref::<T>()
            {
                Some(payload) => handler(backend, cb, payload),
                None => fatal(format_args!("native command payload is not a {}", name)),
            },
        );
        self.handlers.insert(TypeId::of::<T>(), erased);
    }

    pub fn with<T: Any>(mut self, handler: fn(&mut B, B::CommandBuffer, &T)) -> Self {
        self.register(handler);
        self
    }

    pub fn contains(&self, type_tag: TypeId) -> bool {
        self.handlers.contains_key(&type_tag)
    }

    pub fn dispatch(&self, backend: &mut B, cb: B::CommandBuffer, command: &NativeCommand) {
        match self.handlers.get(&command.type_tag) {
            Some(handler) => handler(backend, cb, &*command.payload),
            None => fatal(format_args!(
                "no native handler registered for {}",
                command.type_name
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Event, MockBackend, MockObject, MockUpload};
    use crate::resource::Extent;

    fn upload() -> MockUpload {
        MockUpload {
            staging: MockObject(1),
            texture: MockObject(2),
            extent: Extent::new(4, 4),
        }
    }

    #[test]
    fn dispatch_selects_handler_by_type() {
        let table = MockBackend::native_table();
        assert!(table.contains(TypeId::of::<MockUpload>()));
        assert!(!table.contains(TypeId::of::<u32>()));

        let mut backend = MockBackend::new(1);
        let command = NativeCommand::new(upload());
        assert!(command.type_name().ends_with("MockUpload"));
        table.dispatch(&mut backend, MockObject(7), &command);
        assert_eq!(
            backend.events,
            vec![Event::Upload {
                cb: MockObject(7),
                upload: upload()
            }]
        );
    }

    #[test]
    fn explicit_tag_dispatches_like_a_typed_payload() {
        let table = MockBackend::native_table();
        let mut backend = MockBackend::new(1);
        let command = NativeCommand::from_parts(Arc::new(upload()), TypeId::of::<MockUpload>());
        assert_eq!(command.type_name(), "<opaque>");

        table.dispatch(&mut backend, MockObject(3), &command);
        assert_eq!(backend.count(|e| matches!(e, Event::Upload { .. })), 1);
    }

    #[test]
    #[should_panic(expected = "no native handler registered")]
    fn unregistered_payload_is_fatal() {
        let table = MockBackend::native_table();
        let mut backend = MockBackend::new(1);
        table.dispatch(&mut backend, MockObject(3), &NativeCommand::new(42u32));
    }

    #[test]
    #[should_panic(expected = "payload is not a")]
    fn mismatched_tag_is_fatal() {
        let table = MockBackend::native_table();
        let mut backend = MockBackend::new(1);
        let command = NativeCommand::from_parts(Arc::new(42u32), TypeId::of::<MockUpload>());
        table.dispatch(&mut backend, MockObject(3), &command);
    }
}
