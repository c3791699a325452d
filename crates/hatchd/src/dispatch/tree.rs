//! In-memory routing table: service → object pattern → interface → method.
//!
//! Every level keeps its children in registration order. Object patterns use
//! shell-glob syntax and the first matching pattern wins.

use std::fmt;
use std::rc::Rc;

use glob::Pattern;

use super::DISPATCH_TARGET;
use super::errors::CallError;
use super::handler::MethodHandler;
use crate::bus::{BusConnection, ConnectionToken};

/// Most children any single level may hold.
pub const MAX_CHILDREN: usize = 0xffff;

/// Aborts the process when a level is already full.
pub(crate) fn ensure_room(level: &'static str, owner: &str, len: usize) {
    if len >= MAX_CHILDREN {
        tracing::error!(
            target: DISPATCH_TARGET,
            level,
            owner,
            limit = MAX_CHILDREN,
            "routing table level is full"
        );
        std::process::abort();
    }
}

/// A live bus connection bound to a service name.
pub(crate) struct Link {
    pub(crate) token: ConnectionToken,
    pub(crate) connection: Box<dyn BusConnection>,
    pub(crate) filter_attached: bool,
}

/// A well-known bus name and the objects exported under it.
pub struct Service {
    pub(crate) name: String,
    pub(crate) link: Option<Link>,
    pub(crate) objects: Vec<Object>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("connection", &self.token())
            .field("objects", &self.objects)
            .finish()
    }
}

impl Service {
    pub(crate) fn new(name: &str, link: Link) -> Self {
        Self {
            name: name.to_owned(),
            link: Some(link),
            objects: Vec::new(),
        }
    }

    /// Well-known name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token of the current connection, if connected.
    #[must_use]
    pub fn token(&self) -> Option<ConnectionToken> {
        self.link.as_ref().map(|link| link.token)
    }

    /// Objects in registration order.
    #[must_use]
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Looks up an object by its exact pattern text.
    #[must_use]
    pub fn object(&self, pattern: &str) -> Option<&Object> {
        self.objects.iter().find(|object| object.pattern() == pattern)
    }

    pub(crate) fn upsert(
        &mut self,
        object: &str,
        interface: &str,
        method: &str,
        arity: usize,
        handler: Option<Rc<dyn MethodHandler>>,
    ) {
        let object = match self.objects.iter().position(|o| o.pattern() == object) {
            Some(index) => &mut self.objects[index],
            None => {
                ensure_room("object", &self.name, self.objects.len());
                self.objects.push(Object::new(object));
                let last = self.objects.len() - 1;
                &mut self.objects[last]
            }
        };
        let owner = object.pattern.text.clone();
        let interface = match object.interfaces.iter().position(|i| i.name == interface) {
            Some(index) => &mut object.interfaces[index],
            None => {
                ensure_room("interface", &owner, object.interfaces.len());
                object.interfaces.push(Interface::new(interface));
                let last = object.interfaces.len() - 1;
                &mut object.interfaces[last]
            }
        };
        match interface.methods.iter_mut().find(|m| m.name == method) {
            Some(existing) => {
                existing.arity = arity;
                existing.handler = handler;
            }
            None => {
                ensure_room("method", &interface.name, interface.methods.len());
                interface.methods.push(Method {
                    name: method.to_owned(),
                    arity,
                    handler,
                });
            }
        }
    }

    /// Removes one method and prunes emptied ancestors. Returns whether the
    /// method existed.
    pub(crate) fn remove(&mut self, object: &str, interface: &str, method: &str) -> bool {
        let Some(object_index) = self.objects.iter().position(|o| o.pattern() == object) else {
            return false;
        };
        let node = &mut self.objects[object_index];
        let Some(interface_index) = node.interfaces.iter().position(|i| i.name == interface)
        else {
            return false;
        };
        let methods = &mut node.interfaces[interface_index].methods;
        let Some(method_index) = methods.iter().position(|m| m.name == method) else {
            return false;
        };
        methods.remove(method_index);
        if methods.is_empty() {
            node.interfaces.remove(interface_index);
        }
        if node.interfaces.is_empty() {
            self.objects.remove(object_index);
        }
        true
    }

    /// Routes a call against this service's objects.
    ///
    /// # Errors
    ///
    /// Returns the [`CallError`] to reply with when routing fails.
    pub fn route(
        &self,
        path: &str,
        interface: Option<&str>,
        member: &str,
    ) -> Result<Route<'_>, CallError> {
        route(&self.objects, path, interface, member)
    }
}

/// Object path pattern, compiled once at registration.
struct ObjectPattern {
    text: String,
    // Invalid glob syntax falls back to literal comparison.
    glob: Option<Pattern>,
}

impl ObjectPattern {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            glob: Pattern::new(text).ok(),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match &self.glob {
            Some(glob) => glob.matches(path),
            None => self.text == path,
        }
    }
}

/// An object path pattern and its interfaces.
pub struct Object {
    pattern: ObjectPattern,
    interfaces: Vec<Interface>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("pattern", &self.pattern.text)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

impl Object {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: ObjectPattern::new(pattern),
            interfaces: Vec::new(),
        }
    }

    /// Pattern text as registered.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern.text
    }

    /// Whether `path` matches the pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }

    /// Interfaces in registration order.
    #[must_use]
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Looks up an interface by name.
    #[must_use]
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|interface| interface.name == name)
    }

    /// The single interface declaring `member`, or `None` when zero or
    /// several do.
    fn guess_interface(&self, member: &str) -> Option<&Interface> {
        let mut declaring = self
            .interfaces
            .iter()
            .filter(|interface| interface.method(member).is_some());
        let first = declaring.next()?;
        declaring.next().is_none().then_some(first)
    }
}

/// A named group of methods.
#[derive(Debug)]
pub struct Interface {
    name: String,
    methods: Vec<Method>,
}

impl Interface {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            methods: Vec::new(),
        }
    }

    /// Interface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Methods in registration order.
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Looks up a method by name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// A callable method.
pub struct Method {
    name: String,
    arity: usize,
    handler: Option<Rc<dyn MethodHandler>>,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("implemented", &self.handler.is_some())
            .finish()
    }
}

impl Method {
    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of string arguments accepted.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Handler, absent for unimplemented methods.
    #[must_use]
    pub fn handler(&self) -> Option<&Rc<dyn MethodHandler>> {
        self.handler.as_ref()
    }
}

/// A successful routing result.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    /// Matched object.
    pub object: &'a Object,
    /// Selected interface.
    pub interface: &'a Interface,
    /// Selected method.
    pub method: &'a Method,
}

impl Route<'_> {
    /// Handler of the selected method. Routing never succeeds for a method
    /// without one.
    #[must_use]
    pub fn handler(&self) -> Option<Rc<dyn MethodHandler>> {
        self.method.handler.clone()
    }
}

/// Routes a call against `objects`.
pub(crate) fn route<'a>(
    objects: &'a [Object],
    path: &str,
    interface: Option<&str>,
    member: &str,
) -> Result<Route<'a>, CallError> {
    let object = objects
        .iter()
        .find(|object| object.matches(path))
        .ok_or_else(|| CallError::NoObject {
            path: path.to_owned(),
        })?;
    let selected = match interface {
        Some(name) => object.interface(name),
        None => object.guess_interface(member),
    };
    let interface = selected.ok_or_else(|| CallError::NoInterface {
        interface: interface.unwrap_or_default().to_owned(),
    })?;
    let method = interface.method(member).ok_or_else(|| CallError::NoMethod {
        method: member.to_owned(),
    })?;
    if method.handler.is_none() {
        return Err(CallError::UnimplementedMethod {
            method: member.to_owned(),
        });
    }
    Ok(Route {
        object,
        interface,
        method,
    })
}
