//! Assembles class files in memory for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// A Code attribute body.
#[derive(Clone, Debug, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytes: Vec<u8>,
    /// `(start_pc, end_pc, handler_pc, catch_type)`
    pub exceptions: Vec<(u16, u16, u16, u16)>,
    /// Attributes of the Code attribute itself, by name.
    pub attributes: Vec<(String, Vec<u8>)>,
}

impl Code {
    pub fn new(max_stack: u16, max_locals: u16, bytes: &[u8]) -> Self {
        Code {
            max_stack,
            max_locals,
            bytes: bytes.to_vec(),
            exceptions: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn handler(mut self, start: u16, end: u16, handler: u16, catch_type: u16) -> Self {
        self.exceptions.push((start, end, handler, catch_type));
        self
    }

    pub fn attribute(mut self, name: &str, data: Vec<u8>) -> Self {
        self.attributes.push((name.to_string(), data));
        self
    }
}

/// Payload of a LocalVariableTable or LocalVariableTypeTable attribute.
/// Rows are `(start_pc, length, name_index, descriptor_or_signature_index, slot)`.
pub fn local_table(rows: &[(u16, u16, u16, u16, u16)]) -> Vec<u8> {
    let mut out = (rows.len() as u16).to_be_bytes().to_vec();
    for &(start, length, name, descriptor, slot) in rows {
        for value in [start, length, name, descriptor, slot] {
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
    out
}

pub struct ClassBuilder {
    pool: Vec<Vec<u8>>,
    utf8_cache: HashMap<String, u16>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    attributes: Vec<Vec<u8>>,
}

impl ClassBuilder {
    /// A public class extending `java/lang/Object`.
    pub fn new(name: &str) -> Self {
        let mut builder = ClassBuilder {
            pool: Vec::new(),
            utf8_cache: HashMap::new(),
            access: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.pool.push(entry);
        self.pool.len() as u16
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8_cache.get(value) {
            return index;
        }
        let mut entry = vec![1];
        entry.extend_from_slice(&(value.len() as u16).to_be_bytes());
        entry.extend_from_slice(value.as_bytes());
        let index = self.push(entry);
        self.utf8_cache.insert(value.to_string(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.push(tagged(7, &[name]))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        self.push(tagged(8, &[value]))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.push(tagged(12, &[name, descriptor]))
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        self.push(tagged(9, &[owner, nat]))
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let owner = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        self.push(tagged(10, &[owner, nat]))
    }

    pub fn interface(&mut self, name: &str) -> &mut Self {
        let index = self.class(name);
        self.interfaces.push(index);
        self
    }

    /// Adds a field. `constant` is a pool index for a ConstantValue attribute.
    pub fn field(&mut self, access: u16, name: &str, descriptor: &str, constant: Option<u16>) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut attributes = Vec::new();
        if let Some(index) = constant {
            attributes.push(self.encode_attribute("ConstantValue", &index.to_be_bytes()));
        }
        let member = member(access, name, descriptor, &attributes);
        self.fields.push(member);
        self
    }

    /// Adds a field with a Signature attribute.
    pub fn generic_field(&mut self, access: u16, name: &str, descriptor: &str, signature: &str) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let signature = self.utf8(signature);
        let attributes = vec![self.encode_attribute("Signature", &signature.to_be_bytes())];
        let member = member(access, name, descriptor, &attributes);
        self.fields.push(member);
        self
    }

    pub fn method(&mut self, access: u16, name: &str, descriptor: &str, code: Option<Code>) -> &mut Self {
        self.method_with_signature(access, name, descriptor, code, None)
    }

    /// Adds a method, with a Signature attribute when `signature` is set.
    pub fn method_with_signature(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Option<Code>,
        signature: Option<&str>,
    ) -> &mut Self {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut attributes = Vec::new();
        if let Some(code) = code {
            let mut body = Vec::new();
            body.extend_from_slice(&code.max_stack.to_be_bytes());
            body.extend_from_slice(&code.max_locals.to_be_bytes());
            body.extend_from_slice(&(code.bytes.len() as u32).to_be_bytes());
            body.extend_from_slice(&code.bytes);
            body.extend_from_slice(&(code.exceptions.len() as u16).to_be_bytes());
            for (start, end, handler, catch_type) in &code.exceptions {
                for value in [start, end, handler, catch_type] {
                    body.extend_from_slice(&value.to_be_bytes());
                }
            }
            body.extend_from_slice(&(code.attributes.len() as u16).to_be_bytes());
            for (attr_name, data) in &code.attributes {
                let encoded = self.encode_attribute(attr_name, data);
                body.extend_from_slice(&encoded);
            }
            attributes.push(self.encode_attribute("Code", &body));
        }
        if let Some(signature) = signature {
            let index = self.utf8(signature);
            attributes.push(self.encode_attribute("Signature", &index.to_be_bytes()));
        }
        let member = member(access, name, descriptor, &attributes);
        self.methods.push(member);
        self
    }

    /// Adds a class-level attribute.
    pub fn attribute(&mut self, name: &str, data: &[u8]) -> &mut Self {
        let encoded = self.encode_attribute(name, data);
        self.attributes.push(encoded);
        self
    }

    fn encode_attribute(&mut self, name: &str, data: &[u8]) -> Vec<u8> {
        let name = self.utf8(name);
        let mut out = name.to_be_bytes().to_vec();
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(data);
        out
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52];
        out.extend_from_slice(&(self.pool.len() as u16 + 1).to_be_bytes());
        for entry in &self.pool {
            out.extend_from_slice(entry);
        }
        out.extend_from_slice(&self.access.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for index in &self.interfaces {
            out.extend_from_slice(&index.to_be_bytes());
        }
        for table in [&self.fields, &self.methods, &self.attributes] {
            out.extend_from_slice(&(table.len() as u16).to_be_bytes());
            for item in table {
                out.extend_from_slice(item);
            }
        }
        out
    }
}

fn tagged(tag: u8, indices: &[u16]) -> Vec<u8> {
    let mut entry = vec![tag];
    for index in indices {
        entry.extend_from_slice(&index.to_be_bytes());
    }
    entry
}

fn member(access: u16, name: u16, descriptor: u16, attributes: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in [access, name, descriptor, attributes.len() as u16] {
        out.extend_from_slice(&value.to_be_bytes());
    }
    for attribute in attributes {
        out.extend_from_slice(attribute);
    }
    out
}

/// `demo/Sample`: a private int field, a no-arg constructor and a getter.
pub fn sample_class() -> ClassBuilder {
    let mut class = ClassBuilder::new("demo/Sample");
    let object_init = class.method_ref("java/lang/Object", "<init>", "()V");
    let count = class.field_ref("demo/Sample", "count", "I");
    let [i0, i1] = object_init.to_be_bytes();
    let [c0, c1] = count.to_be_bytes();
    class
        .field(ACC_PRIVATE, "count", "I", None)
        .method(ACC_PUBLIC, "<init>", "()V", Some(Code::new(1, 1, &[0x2a, 0xb7, i0, i1, 0xb1])))
        .method(ACC_PUBLIC, "get", "()I", Some(Code::new(1, 1, &[0x2a, 0xb4, c0, c1, 0xac])));
    class
}
