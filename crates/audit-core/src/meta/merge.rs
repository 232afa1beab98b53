//! Fusión de metadatos en la que los valores ya presentes en el evento
//! tienen precedencia.
//!
//! A diferencia de un merge con override, aquí `defaults` sólo rellena las
//! claves ausentes: lo que un caller ya anotó en un evento no se pisa.

use crate::event::Meta;

/// Agrega a `meta` las claves de `defaults` que todavía no existen.
pub fn merge_missing(meta: &mut Meta, defaults: &Meta) {
    for (k, v) in defaults.iter() {
        if !meta.contains_key(k) {
            meta.insert(k.clone(), v.clone());
        }
    }
}
