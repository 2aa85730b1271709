//! PDF Standard Security Handler (revision 3, 128-bit RC4)
//!
//! Applies a document open password and a restricted permission set to a
//! finished PDF. Every string and stream in the file is encrypted with a
//! per-object key derived from the file key.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// PDF password padding string
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const KEY_LEN: usize = 16;
const REVISION: i64 = 3;

/// PDF permission flags
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Print = 1 << 2,
    Modify = 1 << 3,
    Copy = 1 << 4,
    Annotate = 1 << 5,
    FillForms = 1 << 8,
    Accessibility = 1 << 9,
    Assemble = 1 << 10,
    PrintHighQuality = 1 << 11,
}

/// Set of granted permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(u32);

impl Permissions {
    pub fn none() -> Self {
        Self(0)
    }

    /// Printing allowed; editing, copying and annotating denied
    pub fn print_only() -> Self {
        Self::none()
            .allow(Permission::Print)
            .allow(Permission::PrintHighQuality)
    }

    pub fn allow(self, permission: Permission) -> Self {
        Self(self.0 | permission as u32)
    }

    pub fn allows(self, permission: Permission) -> bool {
        self.0 & permission as u32 != 0
    }

    /// Value of the /P entry: reserved bits 7-8 and 13-32 set, 1-2 clear
    pub fn p_value(self) -> i32 {
        (0xFFFF_F0C0u32 | self.0) as i32
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::print_only()
    }
}

/// Derived keys and dictionary values for one protected file
pub struct SecurityHandler {
    key: Vec<u8>,
    owner_entry: [u8; 32],
    user_entry: [u8; 32],
    p: i32,
    file_id: Vec<u8>,
}

impl SecurityHandler {
    pub fn new(
        user_password: &[u8],
        owner_password: &[u8],
        permissions: Permissions,
        file_id: &[u8],
    ) -> Self {
        let p = permissions.p_value();
        let owner_entry = compute_owner_entry(owner_password, user_password);
        let key = compute_file_key(user_password, &owner_entry, p, file_id);
        let user_entry = compute_user_entry(&key, file_id);

        Self {
            key,
            owner_entry,
            user_entry,
            p,
            file_id: file_id.to_vec(),
        }
    }

    /// Check a candidate user password against the /U entry
    pub fn authenticate_user(&self, password: &[u8]) -> bool {
        let key = compute_file_key(password, &self.owner_entry, self.p, &self.file_id);
        let candidate = compute_user_entry(&key, &self.file_id);
        candidate[..16] == self.user_entry[..16]
    }

    /// Encrypt (or decrypt; RC4 is symmetric) data belonging to an object
    pub fn apply(&self, id: ObjectId, data: &[u8]) -> Vec<u8> {
        rc4(&self.object_key(id), data)
    }

    fn object_key(&self, (num, generation): ObjectId) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.key);
        hasher.update(&num.to_le_bytes()[..3]);
        hasher.update(&generation.to_le_bytes()[..2]);
        let hash = hasher.finalize();
        hash[..(KEY_LEN + 5).min(16)].to_vec()
    }

    fn encrypt_dictionary(&self) -> Dictionary {
        dictionary! {
            "Filter" => "Standard",
            "V" => 2,
            "R" => REVISION,
            "Length" => (KEY_LEN * 8) as i64,
            "O" => Object::String(self.owner_entry.to_vec(), StringFormat::Hexadecimal),
            "U" => Object::String(self.user_entry.to_vec(), StringFormat::Hexadecimal),
            "P" => self.p as i64,
        }
    }
}

/// Protect `pdf` with an open password and permission set.
///
/// `file_id_seed` makes the /ID (and therefore the output) deterministic for
/// a given document.
pub fn protect_pdf(
    pdf: &[u8],
    user_password: &str,
    owner_password: &str,
    permissions: Permissions,
    file_id_seed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if user_password.is_empty() {
        return Err(CryptoError::Pdf("open password must not be empty".into()));
    }

    let mut doc = Document::load_mem(pdf).map_err(|e| CryptoError::Pdf(e.to_string()))?;
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(CryptoError::Pdf("document is already encrypted".into()));
    }

    let file_id = Md5::digest(file_id_seed).to_vec();
    let handler = SecurityHandler::new(
        user_password.as_bytes(),
        owner_password.as_bytes(),
        permissions,
        &file_id,
    );

    for (id, object) in doc.objects.iter_mut() {
        encrypt_object(&handler, *id, object);
    }

    // Added after the pass above so the handler dictionary stays in clear
    let encrypt_id = doc.add_object(Object::Dictionary(handler.encrypt_dictionary()));
    doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(file_id.clone(), StringFormat::Hexadecimal),
            Object::String(file_id, StringFormat::Hexadecimal),
        ]),
    );

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| CryptoError::Pdf(e.to_string()))?;
    Ok(output)
}

fn encrypt_object(handler: &SecurityHandler, id: ObjectId, object: &mut Object) {
    match object {
        Object::String(bytes, _) => {
            *bytes = handler.apply(id, bytes);
        }
        Object::Array(items) => {
            for item in items.iter_mut() {
                encrypt_object(handler, id, item);
            }
        }
        Object::Dictionary(dict) => encrypt_dict(handler, id, dict),
        Object::Stream(stream) => {
            // Cross-reference and object streams are structural, not content
            let structural = matches!(
                stream.dict.get(b"Type"),
                Ok(Object::Name(name)) if name == b"XRef" || name == b"ObjStm"
            );
            if structural {
                return;
            }
            encrypt_dict(handler, id, &mut stream.dict);
            let content = handler.apply(id, &stream.content);
            stream.set_content(content);
        }
        _ => {}
    }
}

fn encrypt_dict(handler: &SecurityHandler, id: ObjectId, dict: &mut Dictionary) {
    let keys: Vec<Vec<u8>> = dict.iter().map(|(k, _)| k.clone()).collect();
    for key in keys {
        if let Ok(value) = dict.get_mut(&key) {
            encrypt_object(handler, id, value);
        }
    }
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

fn compute_owner_entry(owner_password: &[u8], user_password: &[u8]) -> [u8; 32] {
    let owner = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };

    let mut digest = Md5::digest(pad_password(owner)).to_vec();
    for _ in 0..50 {
        digest = Md5::digest(&digest).to_vec();
    }
    let key = &digest[..KEY_LEN];

    let mut output = rc4(key, &pad_password(user_password));
    for i in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        output = rc4(&round_key, &output);
    }

    let mut entry = [0u8; 32];
    entry.copy_from_slice(&output);
    entry
}

fn compute_file_key(user_password: &[u8], owner_entry: &[u8; 32], p: i32, file_id: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(user_password));
    hasher.update(owner_entry);
    hasher.update((p as u32).to_le_bytes());
    hasher.update(file_id);
    let mut digest = hasher.finalize().to_vec();

    for _ in 0..50 {
        digest = Md5::digest(&digest[..KEY_LEN]).to_vec();
    }
    digest.truncate(KEY_LEN);
    digest
}

fn compute_user_entry(key: &[u8], file_id: &[u8]) -> [u8; 32] {
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(file_id);
    let digest = hasher.finalize();

    let mut output = rc4(key, &digest);
    for i in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        output = rc4(&round_key, &output);
    }

    let mut entry = [0u8; 32];
    entry[..16].copy_from_slice(&output);
    entry
}

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: Vec<u8> = (0..=255).collect();
    let mut j: u8 = 0;

    // Key scheduling
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let mut result = Vec::with_capacity(data.len());
    let mut i: u8 = 0;
    let mut j: u8 = 0;

    for &byte in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        result.push(byte ^ k);
    }

    result
}
