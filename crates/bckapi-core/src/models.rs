//! Typed resources of the work-order backend.
//!
//! Fields starting with `_` in the wire format are computed by the server or
//! kept for client bookkeeping; they are read but never written back.

use serde::{Deserialize, Serialize};

use crate::locator::ResourceLocator;
use crate::resource::{ApiList, Resource};

macro_rules! resource {
    ($model:ident, $name:literal) => {
        impl $model {
            pub const RESOURCE: &'static str = $name;

            /// Unlocated instance bound to its registry name.
            pub fn new() -> Self {
                Self {
                    locator: ResourceLocator::item_named($name),
                    ..Self::default()
                }
            }
        }

        impl Resource for $model {
            fn locator(&self) -> &ResourceLocator {
                &self.locator
            }

            fn locator_mut(&mut self) -> &mut ResourceLocator {
                &mut self.locator
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provincia {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
}
resource!(Provincia, "provincia");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Municipio {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
}
resource!(Municipio, "municipio");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Direccion {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codigo_postal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipio_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provincia_id: Option<u64>,
}
resource!(Direccion, "direccion");

/// File class: numbering scheme of work orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaseExpediente {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefijo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sufijo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digitos: Option<u32>,
}
resource!(ClaseExpediente, "claseexpediente");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grupo {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    /// Client-side visibility toggle.
    #[serde(rename = "__visible", default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}
resource!(Grupo, "grupo");

/// Asset work orders are carried out on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activo {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direccion_id: Option<u64>,
}
resource!(Activo, "activo");

/// Lifecycle state of an [`Encargo`], stored as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncargoState {
    Solicitado,
    PendientePresupuesto,
    Presupuestado,
    Parado,
    Aceptado,
    NoAceptado,
    Cancelado,
    Terminado,
}

impl EncargoState {
    const ALL: [Self; 8] = [
        Self::Solicitado,
        Self::PendientePresupuesto,
        Self::Presupuestado,
        Self::Parado,
        Self::Aceptado,
        Self::NoAceptado,
        Self::Cancelado,
        Self::Terminado,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Solicitado => "Solicitado",
            Self::PendientePresupuesto => "Pendente de presupuestar",
            Self::Presupuestado => "Presupuestado",
            Self::Parado => "Parado",
            Self::Aceptado => "Aceptado",
            Self::NoAceptado => "No aceptado",
            Self::Cancelado => "Cancelado",
            Self::Terminado => "Terminado",
        }
    }

    /// States shown on the planning board.
    pub const fn is_planning(self) -> bool {
        matches!(self, Self::Solicitado | Self::Parado | Self::Aceptado)
    }
}

/// Work order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Encargo {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clase_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activo_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estado: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objeto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contenido: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asignado_a_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horas_estimadas: Option<f64>,
    /// Kept as the backend sends it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_programada: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fecha_limite: Option<String>,
    #[serde(rename = "_codigo", default, skip_serializing_if = "Option::is_none")]
    pub codigo: Option<String>,
    #[serde(rename = "_codigocol", default, skip_serializing_if = "Option::is_none")]
    pub codigo_col: Option<String>,
    #[serde(rename = "_activo_html", default, skip_serializing_if = "Option::is_none")]
    pub activo_html: Option<String>,
}
resource!(Encargo, "encargo");

impl Encargo {
    pub fn state(&self) -> Option<EncargoState> {
        self.estado.and_then(EncargoState::from_code)
    }

    pub fn state_label(&self) -> Option<&'static str> {
        self.state().map(EncargoState::label)
    }

    pub fn is_planning(&self) -> bool {
        self.state().is_some_and(EncargoState::is_planning)
    }
}

pub type GrupoList = ApiList<Grupo>;
pub type EncargoList = ApiList<Encargo>;

pub fn grupo_list() -> GrupoList {
    ApiList::named(Grupo::RESOURCE)
}

pub fn encargo_list() -> EncargoList {
    ApiList::named(Encargo::RESOURCE)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn planning_states() {
        let planned: Vec<EncargoState> = EncargoState::ALL
            .into_iter()
            .filter(|state| state.is_planning())
            .collect();

        assert_eq!(
            planned,
            vec![EncargoState::Solicitado, EncargoState::Parado, EncargoState::Aceptado]
        );
        assert_eq!(EncargoState::from_code(4), Some(EncargoState::Aceptado));
        assert_eq!(EncargoState::from_code(8), None);
    }

    #[test]
    fn encargo_reads_server_fields_but_never_sends_them() {
        let mut encargo = Encargo::new();
        encargo
            .merge_value(&json!({ "id": 9, "estado": 3, "_codigo": "E-0009" }))
            .expect("merge");

        assert_eq!(encargo.codigo.as_deref(), Some("E-0009"));
        assert_eq!(encargo.state_label(), Some("Parado"));
        assert!(encargo.is_planning());
        assert_eq!(encargo.locator().name(), Some("encargo"));

        let body = encargo.to_outbound().expect("encode");
        assert_eq!(body, json!({ "id": 9, "estado": 3 }));
    }

    #[test]
    fn grupo_visibility_stays_local() {
        let mut grupo = Grupo::new();
        grupo.visible = Some(true);
        grupo.nombre = Some(String::from("Norte"));

        assert_eq!(grupo.to_outbound().expect("encode"), json!({ "nombre": "Norte" }));
    }
}
