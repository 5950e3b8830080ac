//! Kerberos as the GSS-API mechanism for negotiated contexts.
//!
//! Turning a [`Credential`] into a ticket is plain data ([`Acquisition`]) and
//! always available. The mechanism that drives the system GSS-API library
//! is built with the `kerberos` feature.

use std::ffi::OsString;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use super::gss::Credential;
use crate::error::AuthenticationError;

/// The program used to obtain tickets for explicit credentials.
pub const KINIT: &str = "kinit";

/// How the initiator's Kerberos credential is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Use the default credential cache as it is.
    Default,
    /// Get a ticket for `principal` from a keytab.
    Keytab { principal: String, keytab: PathBuf },
    /// Get a ticket for `principal` with a password written to `kinit`.
    Password { principal: String },
}

impl Acquisition {
    pub fn for_credential(credential: &Credential, realm: &str) -> Self {
        match credential {
            Credential::Ambient => Acquisition::Default,
            Credential::Keytab { username, path } => Acquisition::Keytab {
                principal: principal(username, realm),
                keytab: path.clone(),
            },
            Credential::Password { username, .. } => Acquisition::Password {
                principal: principal(username, realm),
            },
        }
    }

    /// The principal to acquire a credential for, `None` for the default.
    pub fn principal(&self) -> Option<&str> {
        match self {
            Acquisition::Default => None,
            Acquisition::Keytab { principal, .. } | Acquisition::Password { principal } => {
                Some(principal)
            }
        }
    }

    /// Arguments to `kinit`, or `None` when no ticket has to be obtained.
    pub fn kinit_args(&self) -> Option<Vec<OsString>> {
        match self {
            Acquisition::Default => None,
            Acquisition::Keytab { principal, keytab } => Some(vec![
                "-k".into(),
                "-t".into(),
                keytab.clone().into_os_string(),
                principal.into(),
            ]),
            Acquisition::Password { principal } => Some(vec![principal.into()]),
        }
    }

    /// Put a ticket for the principal into the default credential cache.
    pub fn obtain(&self, credential: &Credential) -> Result<(), AuthenticationError> {
        let Some(args) = self.kinit_args() else {
            return Ok(());
        };
        debug!(principal = ?self.principal(), "obtaining kerberos ticket");

        let mut command = Command::new(KINIT);
        command
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|error| AuthenticationError::Mechanism(Box::new(error)))?;

        if let (Credential::Password { password, .. }, Some(mut stdin)) =
            (credential, child.stdin.take())
        {
            writeln!(stdin, "{}", password.as_str())
                .map_err(|error| AuthenticationError::Mechanism(Box::new(error)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|error| AuthenticationError::Mechanism(Box::new(error)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AuthenticationError::Negotiation(format!(
                "{KINIT} failed for {}: {}",
                self.principal().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// `user@REALM`, unless the username already names a realm.
fn principal(username: &str, realm: &str) -> String {
    if username.contains('@') {
        username.to_string()
    } else {
        format!("{username}@{realm}")
    }
}

#[cfg(feature = "kerberos")]
pub use self::mechanism::KerberosMechanism;

#[cfg(feature = "kerberos")]
mod mechanism {
    use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext};
    use libgssapi::credential::{Cred, CredUsage};
    use libgssapi::name::Name;
    use libgssapi::oid::{GSS_MECH_KRB5, GSS_NT_KRB5_PRINCIPAL, OidSet};
    use tracing::trace;

    use super::Acquisition;
    use crate::auth::gss::{Credential, GssContext, GssMechanism, ServicePrincipal};
    use crate::error::AuthenticationError;

    fn mechanism_error(error: libgssapi::error::Error) -> AuthenticationError {
        AuthenticationError::Mechanism(Box::new(error))
    }

    /// Kerberos through the system GSS-API library.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct KerberosMechanism;

    impl KerberosMechanism {
        pub fn new() -> Self {
            Self
        }

        fn credential(&self, acquisition: &Acquisition) -> Result<Cred, AuthenticationError> {
            let mut mechanisms = OidSet::new().map_err(mechanism_error)?;
            mechanisms.add(&GSS_MECH_KRB5).map_err(mechanism_error)?;

            let name = acquisition
                .principal()
                .map(|principal| Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL)))
                .transpose()
                .map_err(mechanism_error)?;
            Cred::acquire(name.as_ref(), None, CredUsage::Initiate, Some(&mechanisms))
                .map_err(mechanism_error)
        }
    }

    impl GssMechanism for KerberosMechanism {
        fn initiate(
            &self,
            credential: &Credential,
            target: &ServicePrincipal,
        ) -> Result<Box<dyn GssContext>, AuthenticationError> {
            let acquisition = Acquisition::for_credential(credential, &target.realm);
            acquisition.obtain(credential)?;
            let cred = self.credential(&acquisition)?;

            let service = Name::new(
                target.to_string().as_bytes(),
                Some(&GSS_NT_KRB5_PRINCIPAL),
            )
            .map_err(mechanism_error)?;
            let flags = CtxFlags::GSS_C_MUTUAL_FLAG
                | CtxFlags::GSS_C_INTEG_FLAG
                | CtxFlags::GSS_C_REPLAY_FLAG
                | CtxFlags::GSS_C_SEQUENCE_FLAG;

            trace!(%target, "initiating kerberos context");
            Ok(Box::new(KerberosContext {
                context: ClientCtx::new(Some(cred), service, flags, Some(&GSS_MECH_KRB5)),
            }))
        }
    }

    struct KerberosContext {
        context: ClientCtx,
    }

    impl GssContext for KerberosContext {
        fn step(
            &mut self,
            token: Option<&[u8]>,
        ) -> Result<Option<Vec<u8>>, AuthenticationError> {
            let token = self.context.step(token, None).map_err(mechanism_error)?;
            Ok(token.map(|token| token.to_vec()))
        }

        fn is_complete(&self) -> bool {
            self.context.is_complete()
        }

        fn get_mic(&mut self, message: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
            let mic = self.context.get_mic(message).map_err(mechanism_error)?;
            Ok(mic.to_vec())
        }

        fn verify_mic(&mut self, message: &[u8], mic: &[u8]) -> Result<(), AuthenticationError> {
            self.context
                .verify_mic(message, mic)
                .map_err(|_| AuthenticationError::BadSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use zeroize::Zeroizing;

    use super::*;

    #[test]
    fn ambient_credentials_use_the_default_cache() {
        let acquisition = Acquisition::for_credential(&Credential::Ambient, "EXAMPLE.COM");
        assert_eq!(acquisition, Acquisition::Default);
        assert_eq!(acquisition.principal(), None);
        assert_eq!(acquisition.kinit_args(), None);
        assert!(acquisition.obtain(&Credential::Ambient).is_ok());
    }

    #[test]
    fn keytabs_name_the_principal_in_the_realm() {
        let credential = Credential::Keytab {
            username: "updater".into(),
            path: PathBuf::from("/etc/updater.keytab"),
        };
        let acquisition = Acquisition::for_credential(&credential, "EXAMPLE.COM");
        assert_eq!(acquisition.principal(), Some("updater@EXAMPLE.COM"));

        let args = acquisition.kinit_args().unwrap();
        assert_eq!(
            args,
            ["-k", "-t", "/etc/updater.keytab", "updater@EXAMPLE.COM"]
                .map(OsString::from)
                .to_vec()
        );
    }

    #[test]
    fn passwords_stay_off_the_command_line() {
        let credential = Credential::Password {
            username: "admin@CORP.EXAMPLE".into(),
            password: Zeroizing::new("hunter2".into()),
        };
        let acquisition = Acquisition::for_credential(&credential, "EXAMPLE.COM");
        assert_eq!(
            acquisition,
            Acquisition::Password {
                principal: "admin@CORP.EXAMPLE".into()
            }
        );

        let args = acquisition.kinit_args().unwrap();
        assert_eq!(args, vec![OsString::from("admin@CORP.EXAMPLE")]);
        assert!(!format!("{args:?}").contains("hunter2"));
    }
}
