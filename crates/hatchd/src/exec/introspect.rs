//! Introspection data generated from the routing table.

use std::fmt::{self, Write};

use crate::dispatch::{MethodCall, MethodHandler, Object};

/// Interface answering introspection requests.
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// Method answering introspection requests.
pub const INTROSPECT_METHOD: &str = "Introspect";

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
     \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

/// Replies with the XML description of the matched object.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntrospectHandler;

impl MethodHandler for IntrospectHandler {
    fn handle(&self, call: &mut MethodCall<'_>) {
        let xml = introspect_xml(call.object_node());
        call.reply_plain(xml);
    }
}

/// Describes every interface and method of `object`.
///
/// Ordinary methods take `arity` strings and return `(i, s, s)`.
#[must_use]
pub fn introspect_xml(object: &Object) -> String {
    let mut xml = String::new();
    render(&mut xml, object).map_or_else(|_| String::new(), |()| xml)
}

fn render(out: &mut impl Write, object: &Object) -> fmt::Result {
    out.write_str(DOCTYPE)?;
    writeln!(out, "<node>")?;
    for interface in object.interfaces() {
        writeln!(out, " <interface name=\"{}\">", Escaped(interface.name()))?;
        for method in interface.methods() {
            writeln!(out, "  <method name=\"{}\">", Escaped(method.name()))?;
            if interface.name() == INTROSPECTABLE_INTERFACE && method.name() == INTROSPECT_METHOD {
                writeln!(out, "   <arg name=\"xml_data\" type=\"s\" direction=\"out\"/>")?;
            } else {
                for index in 0..method.arity() {
                    writeln!(out, "   <arg name=\"arg{index}\" type=\"s\" direction=\"in\"/>")?;
                }
                writeln!(out, "   <arg name=\"result\" type=\"i\" direction=\"out\"/>")?;
                writeln!(out, "   <arg name=\"stdout\" type=\"s\" direction=\"out\"/>")?;
                writeln!(out, "   <arg name=\"stderr\" type=\"s\" direction=\"out\"/>")?;
            }
            writeln!(out, "  </method>")?;
        }
        writeln!(out, " </interface>")?;
    }
    writeln!(out, "</node>")
}

/// Attribute text with XML markup escaped.
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for character in self.0.chars() {
            match character {
                '&' => f.write_str("&amp;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                other => f.write_char(other)?,
            }
        }
        Ok(())
    }
}
