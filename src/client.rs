// client.rs - the session engine (spec.md §4.6)
//
// Drives the single-request PAP/CHAP-MD5 flow and the multi-round
// EAP/MS-CHAPv2 state machine (including the PEAP-proposal NAK fallback and
// the RFC 2759 change-password sub-flow), plus ordered server-list retry.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::builder::{build_packet, random_bytes, IdentifierCounter};
use crate::codec::{attr, decode_packet, Attribute, AttributeValue, PacketCode, RawPacket};
use crate::crypto::{
    chap_md5_response, encrypted_hash_blob, encrypted_password_blob, mschap1_nt_response,
    mschap2_nt_response, nt_password_hash, pap_crypt, response_authenticator,
};
use crate::eap::{
    eap_type, join_eap_messages, parse_failure_message, split_eap_message, EapPacket,
    MsChap2Packet,
};
use crate::error::{ms_chap_failure, ErrorCode, RadiusError, Result};
use crate::transport::Transport;

pub const DEFAULT_AUTH_PORT: u16 = 1812;
pub const DEFAULT_ACCT_PORT: u16 = 1813;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A RADIUS client: server endpoint(s), shared secret, and the per-client
/// configuration and counters spec.md §3 names (packet-id counter,
/// last-error, default attributes).
pub struct Client {
    servers: Vec<String>,
    secret: Vec<u8>,
    suffix: String,
    auth_port: u16,
    acct_port: u16,
    timeout: Duration,
    nas_ip: Option<Ipv4Addr>,
    nas_port: Option<u32>,
    extra_attributes: Vec<Attribute>,
    include_message_authenticator: bool,
    id_counter: IdentifierCounter,
    last_error: Option<RadiusError>,
    received: Option<RawPacket>,
}

impl Client {
    pub fn new(server: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Client {
            servers: vec![server.into()],
            secret: secret.into(),
            suffix: String::new(),
            auth_port: DEFAULT_AUTH_PORT,
            acct_port: DEFAULT_ACCT_PORT,
            timeout: DEFAULT_TIMEOUT,
            nas_ip: None,
            nas_port: None,
            extra_attributes: Vec::new(),
            include_message_authenticator: true,
            id_counter: IdentifierCounter::default(),
            last_error: None,
            received: None,
        }
    }

    /// Adds a failover server tried, in order, after the primary when an
    /// attempt fails for any reason other than Access-Reject (spec.md §4.6
    /// "Server-list retry").
    pub fn add_server(&mut self, server: impl Into<String>) {
        self.servers.push(server.into());
    }

    pub fn set_suffix(&mut self, suffix: impl Into<String>) {
        self.suffix = suffix.into();
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_auth_port(&mut self, port: u16) {
        self.auth_port = port;
    }

    pub fn set_acct_port(&mut self, port: u16) {
        self.acct_port = port;
    }

    pub fn set_nas_ip(&mut self, ip: Ipv4Addr) {
        self.nas_ip = Some(ip);
    }

    pub fn set_nas_port(&mut self, port: u32) {
        self.nas_port = Some(port);
    }

    pub fn set_attribute(&mut self, attribute: Attribute) {
        self.extra_attributes.retain(|a| {
            a.code != attribute.code || crate::codec::is_multivalued(a.code)
        });
        self.extra_attributes.push(attribute);
    }

    pub fn set_vendor_attribute(&mut self, vendor_id: u32, vendor_type: u8, data: Vec<u8>) {
        self.extra_attributes
            .push(Attribute::vendor_specific(vendor_id, vendor_type, data));
    }

    pub fn set_include_message_authenticator(&mut self, include: bool) {
        self.include_message_authenticator = include;
    }

    /// Applies the username-suffix policy (spec.md §6): an `@` in the
    /// username suppresses the configured suffix.
    pub fn apply_suffix(&self, username: &str) -> String {
        if username.contains('@') || self.suffix.is_empty() {
            username.to_string()
        } else {
            format!("{username}{}", self.suffix)
        }
    }

    pub fn last_error_code(&self) -> u32 {
        self.last_error
            .as_ref()
            .map(|e| e.code().as_u32())
            .unwrap_or(ErrorCode::None.as_u32())
    }

    pub fn last_error_message(&self) -> String {
        self.last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default()
    }

    pub fn received_code(&self) -> Option<PacketCode> {
        self.received.as_ref().map(|p| p.code)
    }

    pub fn received_attributes(&self) -> &[Attribute] {
        self.received
            .as_ref()
            .map(|p| p.attributes.as_slice())
            .unwrap_or(&[])
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    fn connect(&self, server: &str) -> Result<Transport> {
        Transport::connect((server, self.auth_port), self.timeout)
    }

    fn common_attributes(&self) -> Vec<Attribute> {
        let mut attrs = self.extra_attributes.clone();
        if let Some(ip) = self.nas_ip {
            attrs.push(Attribute::address(attr::NAS_IP_ADDRESS, ip));
        }
        if let Some(port) = self.nas_port {
            attrs.push(Attribute::integer(attr::NAS_PORT, port));
        }
        attrs
    }

    /// Builds, sends, and verifies one request/response round, returning the
    /// decoded response packet. `attributes` must already include a
    /// Message-Authenticator placeholder if one is wanted.
    fn exchange(&mut self, transport: &Transport, attributes: Vec<Attribute>) -> Result<RawPacket> {
        let request_authenticator = random_bytes::<16>();
        self.send_with_authenticator(transport, attributes, request_authenticator)
    }

    // RFC 3579 §2.1: the NAS must echo the username from the EAP-Response/
    // Identity back as a top-level User-Name attribute on every Access-
    // Request of the exchange, not just the one carrying the identity.
    fn eap_attributes(&self, username: &str, eap_bytes: &[u8], state: Option<&[u8]>) -> Vec<Attribute> {
        let mut attrs = vec![Attribute::text(attr::USER_NAME, username)];
        for chunk in split_eap_message(eap_bytes) {
            attrs.push(Attribute::bytes(attr::EAP_MESSAGE, chunk));
        }
        if let Some(state) = state {
            attrs.push(Attribute::bytes(attr::STATE, state.to_vec()));
        }
        attrs.extend(self.common_attributes());
        if self.include_message_authenticator {
            attrs.push(Attribute::bytes(attr::MESSAGE_AUTHENTICATOR, vec![0u8; 16]));
        }
        attrs
    }

    fn extract_eap(response: &RawPacket) -> Result<EapPacket> {
        let chunks: Vec<Vec<u8>> = response
            .get_all(attr::EAP_MESSAGE)
            .into_iter()
            .map(|a| a.value_bytes())
            .collect();
        if chunks.is_empty() {
            return Err(RadiusError::ProtocolError(
                "Access-Challenge missing EAP-Message".into(),
            ));
        }
        EapPacket::decode(&join_eap_messages(&chunks))
    }

    fn extract_state(response: &RawPacket) -> Option<Vec<u8>> {
        response.get(attr::STATE).map(|a| a.value_bytes())
    }

    // ---- PAP ----

    /// `authenticatePAP` (spec.md §6).
    pub fn authenticate_pap(&mut self, username: &str, password: &str, state: Option<&[u8]>) -> bool {
        let username = self.apply_suffix(username);
        let password = password.to_string();
        let state = state.map(|s| s.to_vec());
        self.clear_last_error();
        self.try_servers(move |client, server| {
            client.run_pap(server, &username, &password, state.as_deref())
        })
    }

    fn run_pap(&mut self, server: &str, username: &str, password: &str, state: Option<&[u8]>) -> Result<()> {
        let transport = self.connect(server)?;
        let request_authenticator = random_bytes::<16>();

        let obfuscated = pap_crypt(password.as_bytes(), &self.secret, &request_authenticator);
        let mut attributes = vec![
            Attribute::text(attr::USER_NAME, username),
            Attribute::bytes(attr::USER_PASSWORD, obfuscated),
        ];
        if let Some(state) = state {
            attributes.push(Attribute::bytes(attr::STATE, state.to_vec()));
        }
        attributes.extend(self.common_attributes());
        if self.include_message_authenticator {
            attributes.push(Attribute::bytes(attr::MESSAGE_AUTHENTICATOR, vec![0u8; 16]));
        }

        // PAP needs to obfuscate the password with the same
        // Request-Authenticator it sends, so it is generated here rather
        // than inside a shared helper.
        let response = self.send_with_authenticator(&transport, attributes, request_authenticator)?;
        self.received = Some(response.clone());
        match response.code {
            PacketCode::AccessAccept => {
                info!(server, "PAP authentication accepted");
                Ok(())
            }
            PacketCode::AccessReject => {
                warn!(server, "PAP authentication rejected");
                Err(RadiusError::AccessRejected)
            }
            other => Err(RadiusError::InvalidResponse(format!(
                "unexpected packet code {}",
                other.to_u8()
            ))),
        }
    }

    // ---- CHAP-MD5 ----

    pub fn authenticate_chap_md5(&mut self, username: &str, password: &str) -> bool {
        let username = self.apply_suffix(username);
        let password = password.to_string();
        self.clear_last_error();
        self.try_servers(move |client, server| client.run_chap_md5(server, &username, &password))
    }

    fn run_chap_md5(&mut self, server: &str, username: &str, password: &str) -> Result<()> {
        let transport = self.connect(server)?;
        let request_authenticator = random_bytes::<16>();
        let chap_id = random_bytes::<1>()[0];

        let digest = chap_md5_response(chap_id, password.as_bytes(), &request_authenticator);
        let mut chap_password = Vec::with_capacity(17);
        chap_password.push(chap_id);
        chap_password.extend_from_slice(&digest);

        let mut attributes = vec![
            Attribute::text(attr::USER_NAME, username),
            Attribute::bytes(attr::CHAP_PASSWORD, chap_password),
        ];
        attributes.extend(self.common_attributes());
        if self.include_message_authenticator {
            attributes.push(Attribute::bytes(attr::MESSAGE_AUTHENTICATOR, vec![0u8; 16]));
        }

        let response = self.send_with_authenticator(&transport, attributes, request_authenticator)?;
        self.received = Some(response.clone());
        match response.code {
            PacketCode::AccessAccept => Ok(()),
            PacketCode::AccessReject => Err(RadiusError::AccessRejected),
            other => Err(RadiusError::InvalidResponse(format!(
                "unexpected packet code {}",
                other.to_u8()
            ))),
        }
    }

    // ---- MS-CHAP v1 ----

    /// Drives a standalone MS-CHAP v1 exchange (RFC 2433): an 8-byte
    /// challenge carried as Microsoft vendor attribute 11, and the
    /// Ident/Flags/LM-Response/NT-Response blob as vendor attribute 1.
    /// Message-Authenticator is always included (spec.md §4.2).
    pub fn authenticate_ms_chap_v1(&mut self, username: &str, password: &str) -> bool {
        let username = self.apply_suffix(username);
        let password = password.to_string();
        self.clear_last_error();
        self.try_servers(move |client, server| client.run_ms_chap_v1(server, &username, &password))
    }

    fn run_ms_chap_v1(&mut self, server: &str, username: &str, password: &str) -> Result<()> {
        let transport = self.connect(server)?;
        let request_authenticator = random_bytes::<16>();
        let challenge = random_bytes::<8>();
        let nt_response = mschap1_nt_response(&challenge, password);

        // RFC 2548 §2.1.2: Ident(1) | Flags(1, NT-only) | LM-Response(24,
        // unused, zeroed) | NT-Response(24).
        let mut response_value = Vec::with_capacity(50);
        response_value.push(0x00);
        response_value.push(0x01);
        response_value.extend_from_slice(&[0u8; 24]);
        response_value.extend_from_slice(&nt_response);

        let mut attributes = vec![
            Attribute::text(attr::USER_NAME, username),
            Attribute::vendor_specific(
                attr::MICROSOFT_VENDOR_ID,
                attr::MS_CHAP_CHALLENGE,
                challenge.to_vec(),
            ),
            Attribute::vendor_specific(
                attr::MICROSOFT_VENDOR_ID,
                attr::MS_CHAP_RESPONSE,
                response_value,
            ),
        ];
        attributes.extend(self.common_attributes());
        attributes.push(Attribute::bytes(attr::MESSAGE_AUTHENTICATOR, vec![0u8; 16]));

        let response = self.send_with_authenticator(&transport, attributes, request_authenticator)?;
        self.received = Some(response.clone());
        match response.code {
            PacketCode::AccessAccept => {
                info!(server, "MS-CHAPv1 authentication accepted");
                Ok(())
            }
            PacketCode::AccessReject => {
                warn!(server, "MS-CHAPv1 authentication rejected");
                Err(RadiusError::AccessRejected)
            }
            other => Err(RadiusError::InvalidResponse(format!(
                "unexpected packet code {}",
                other.to_u8()
            ))),
        }
    }

    fn send_with_authenticator(
        &mut self,
        transport: &Transport,
        attributes: Vec<Attribute>,
        request_authenticator: [u8; 16],
    ) -> Result<RawPacket> {
        let identifier = self.id_counter.next();
        let packet_bytes = build_packet(
            PacketCode::AccessRequest,
            identifier,
            &request_authenticator,
            &attributes,
            &self.secret,
        )?;
        debug!(identifier, "sending Access-Request");
        let response_bytes = transport.round_trip(&packet_bytes)?;
        let response = decode_packet(&response_bytes)?;
        if response.identifier != identifier {
            return Err(RadiusError::InvalidResponse(format!(
                "identifier mismatch: sent {identifier}, received {}",
                response.identifier
            )));
        }
        let body = &response_bytes[crate::codec::HEADER_LEN..];
        let expected = response_authenticator(
            response.code.to_u8(),
            response.identifier,
            response_bytes.len() as u16,
            &request_authenticator,
            body,
            &self.secret,
        );
        if expected != response.authenticator {
            return Err(RadiusError::AuthenticatorMismatch);
        }
        Ok(response)
    }

    // ---- EAP / MS-CHAPv2 ----

    pub fn authenticate_eap_ms_chap_v2(&mut self, username: &str, password: &str) -> bool {
        let username = self.apply_suffix(username);
        let password = password.to_string();
        self.clear_last_error();
        self.try_servers(move |client, server| {
            client.run_eap_ms_chap_v2(server, &username, &password, None)
        })
    }

    pub fn change_password_eap_ms_chap_v2(
        &mut self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> bool {
        let username = self.apply_suffix(username);
        let old_password = old_password.to_string();
        let new_password = new_password.to_string();
        self.clear_last_error();
        self.try_servers(move |client, server| {
            client.run_eap_ms_chap_v2(server, &username, &old_password, Some(&new_password))
        })
    }

    fn run_eap_ms_chap_v2(
        &mut self,
        server: &str,
        username: &str,
        password: &str,
        change_to: Option<&str>,
    ) -> Result<()> {
        let transport = self.connect(server)?;

        // INITIAL -> AWAIT_CHALLENGE
        let identity = EapPacket::identity_response(1, username);
        let attrs = self.eap_attributes(username, &identity.encode(), None);
        let mut response = self.exchange(&transport, attrs)?;

        let mut state = Self::extract_state(&response);
        let mut request = Self::extract_eap(&response)?;

        // AWAIT_CHALLENGE, looping once through a PEAP proposal NAK.
        loop {
            match request.type_code {
                Some(eap_type::PEAP) => {
                    let nak = EapPacket::legacy_nak(request.id, eap_type::MS_AUTH);
                    let attrs = self.eap_attributes(username, &nak.encode(), state.as_deref());
                    response = self.exchange(&transport, attrs)?;
                    state = Self::extract_state(&response);
                    request = Self::extract_eap(&response)?;
                    continue;
                }
                Some(eap_type::MD5_CHALLENGE) => {
                    return self.finish_chap_md5_fallback(
                        &transport,
                        username,
                        password,
                        &request,
                        state.as_deref(),
                    );
                }
                Some(eap_type::MS_AUTH) => break,
                _ => {
                    return Err(RadiusError::ProtocolError(
                        "expected PEAP, MD5-Challenge, or MS-Auth from Access-Challenge".into(),
                    ))
                }
            }
        }

        let challenge_packet = MsChap2Packet::decode(&request.data)?;
        let (auth_challenge, ms_chap_id) = match challenge_packet {
            MsChap2Packet::Challenge {
                ms_chap_id,
                challenge,
                ..
            } => (challenge, ms_chap_id),
            _ => {
                return Err(RadiusError::ProtocolError(
                    "expected MS-CHAPv2 Challenge opcode".into(),
                ))
            }
        };

        // AWAIT_VERDICT
        let peer_challenge = random_bytes::<16>();
        let nt_response = mschap2_nt_response(&auth_challenge, &peer_challenge, username, password);
        let response_packet = MsChap2Packet::Response {
            ms_chap_id,
            peer_challenge,
            nt_response,
            flags: 0,
            name: username.as_bytes().to_vec(),
        };
        let eap_response = EapPacket::ms_auth_response(request.id, response_packet.encode());
        let attrs = self.eap_attributes(username, &eap_response.encode(), state.as_deref());
        response = self.exchange(&transport, attrs)?;
        state = Self::extract_state(&response);
        request = Self::extract_eap(&response)?;

        if request.type_code != Some(eap_type::MS_AUTH) {
            return Err(RadiusError::ProtocolError(
                "expected MS-Auth verdict after MS-CHAPv2 Response".into(),
            ));
        }

        match MsChap2Packet::decode(&request.data)? {
            MsChap2Packet::Success { .. } => {
                self.finish_eap_success(&transport, username, ms_chap_id, state.as_deref())
            }
            MsChap2Packet::Failure { message, .. } => {
                let failure = parse_failure_message(&message)?;
                if failure.code == 648 {
                    if let Some(new_password) = change_to {
                        return self.run_change_password(
                            &transport,
                            username,
                            password,
                            new_password,
                            request.id,
                            state.as_deref(),
                            &failure,
                        );
                    }
                }
                Err(ms_chap_failure(failure.code))
            }
            _ => Err(RadiusError::ProtocolError(
                "expected MS-CHAPv2 Success or Failure".into(),
            )),
        }
    }

    fn finish_chap_md5_fallback(
        &mut self,
        transport: &Transport,
        username: &str,
        password: &str,
        request: &EapPacket,
        state: Option<&[u8]>,
    ) -> Result<()> {
        let data = &request.data;
        if data.is_empty() {
            return Err(RadiusError::ProtocolError(
                "empty MD5-Challenge EAP payload".into(),
            ));
        }
        let value_size = data[0] as usize;
        if data.len() < 1 + value_size {
            return Err(RadiusError::ProtocolError(
                "truncated MD5-Challenge EAP payload".into(),
            ));
        }
        let challenge = &data[1..1 + value_size];
        let chap_id = request.id;
        let digest = chap_md5_response(chap_id, password.as_bytes(), challenge);

        let mut chap_password = Vec::with_capacity(17);
        chap_password.push(chap_id);
        chap_password.extend_from_slice(&digest);

        let mut attrs = vec![
            Attribute::text(attr::USER_NAME, username),
            Attribute::bytes(attr::CHAP_PASSWORD, chap_password),
        ];
        if let Some(state) = state {
            attrs.push(Attribute::bytes(attr::STATE, state.to_vec()));
        }
        attrs.extend(self.common_attributes());
        if self.include_message_authenticator {
            attrs.push(Attribute::bytes(attr::MESSAGE_AUTHENTICATOR, vec![0u8; 16]));
        }

        let response = self.exchange(transport, attrs)?;
        self.received = Some(response.clone());
        match response.code {
            PacketCode::AccessAccept => Ok(()),
            PacketCode::AccessReject => Err(RadiusError::AccessRejected),
            other => Err(RadiusError::InvalidResponse(format!(
                "unexpected packet code {}",
                other.to_u8()
            ))),
        }
    }

    fn run_change_password(
        &mut self,
        transport: &Transport,
        username: &str,
        old_password: &str,
        new_password: &str,
        eap_id: u8,
        state: Option<&[u8]>,
        failure: &crate::eap::MsChapFailure,
    ) -> Result<()> {
        let challenge = failure.challenge.ok_or_else(|| {
            RadiusError::ProtocolError("E=648 failure missing C= challenge".into())
        })?;

        let old_hash = nt_password_hash(old_password);
        let new_hash = nt_password_hash(new_password);
        let encrypted_password = encrypted_password_blob(new_password, &old_hash);
        let encrypted_hash = encrypted_hash_blob(&new_hash, &old_hash);

        let peer_challenge = random_bytes::<16>();
        let nt_response = mschap2_nt_response(&challenge, &peer_challenge, username, old_password);

        // The ChangePassword sub-packet's ms_chap_id and the wrapping EAP
        // id track together through this whole exchange, so both reuse the
        // id the Failure packet arrived with.
        let ms_chap_id = eap_id;

        let change_packet = MsChap2Packet::ChangePassword {
            ms_chap_id,
            encrypted_password,
            encrypted_hash,
            peer_challenge,
            nt_response,
            flags: 0,
        };
        let eap_request = EapPacket::ms_auth_response(eap_id, change_packet.encode());
        let attrs = self.eap_attributes(username, &eap_request.encode(), state);

        let response = self.exchange(transport, attrs)?;
        let new_state = Self::extract_state(&response);
        let reply = Self::extract_eap(&response)?;

        if reply.type_code != Some(eap_type::MS_AUTH) {
            return Err(RadiusError::ProtocolError(
                "expected MS-Auth verdict after ChangePassword".into(),
            ));
        }

        match MsChap2Packet::decode(&reply.data)? {
            MsChap2Packet::Success { .. } => {
                self.finish_eap_success(transport, username, ms_chap_id, new_state.as_deref())
            }
            MsChap2Packet::Failure { message, .. } => {
                let failure = parse_failure_message(&message)?;
                Err(ms_chap_failure(failure.code))
            }
            _ => Err(RadiusError::ProtocolError(
                "expected MS-CHAPv2 Success or Failure after ChangePassword".into(),
            )),
        }
    }

    fn finish_eap_success(
        &mut self,
        transport: &Transport,
        username: &str,
        ms_chap_id: u8,
        state: Option<&[u8]>,
    ) -> Result<()> {
        let success = EapPacket::success(ms_chap_id.wrapping_add(1));
        let attrs = self.eap_attributes(username, &success.encode(), state);
        let response = self.exchange(transport, attrs)?;
        self.received = Some(response.clone());
        match response.code {
            PacketCode::AccessAccept => {
                info!("EAP/MS-CHAPv2 authentication accepted");
                Ok(())
            }
            PacketCode::AccessReject => Err(RadiusError::AccessRejected),
            other => Err(RadiusError::InvalidResponse(format!(
                "unexpected packet code {}",
                other.to_u8()
            ))),
        }
    }

    // ---- server-list retry ----

    /// Runs `attempt` against each configured server in order. Stops
    /// immediately on success or Access-Reject; on any other failure,
    /// tries the next server with a freshly built attribute list (spec.md
    /// §4.6 "Server-list retry", §8 property 8).
    fn try_servers<F>(&mut self, mut attempt: F) -> bool
    where
        F: FnMut(&mut Client, &str) -> Result<()>,
    {
        let servers = self.servers.clone();
        let mut last_err: Option<RadiusError> = None;

        for (i, server) in servers.iter().enumerate() {
            match attempt(self, server) {
                Ok(()) => {
                    self.last_error = None;
                    return true;
                }
                Err(RadiusError::AccessRejected) => {
                    self.last_error = Some(RadiusError::AccessRejected);
                    return false;
                }
                Err(e @ RadiusError::AuthenticationFailed { .. }) => {
                    self.last_error = Some(e);
                    return false;
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "authentication attempt failed");
                    let is_last = i + 1 == servers.len();
                    last_err = Some(e);
                    if !is_last {
                        continue;
                    }
                }
            }
        }

        if let Some(e) = last_err {
            self.last_error = Some(e);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_appended_only_without_at_sign() {
        let mut client = Client::new("radius.example.com", "secret");
        client.set_suffix(".x");
        assert_eq!(client.apply_suffix("a"), "a.x");
        assert_eq!(client.apply_suffix("a@b"), "a@b");
    }

    #[test]
    fn fresh_client_has_no_error() {
        let client = Client::new("radius.example.com", "secret");
        assert_eq!(client.last_error_code(), ErrorCode::None.as_u32());
        assert_eq!(client.last_error_message(), "");
    }

    #[test]
    fn set_attribute_replaces_single_valued_attribute() {
        let mut client = Client::new("radius.example.com", "secret");
        client.set_attribute(Attribute::integer(attr::SERVICE_TYPE, 1));
        client.set_attribute(Attribute::integer(attr::SERVICE_TYPE, 2));
        let values: Vec<_> = client.common_attributes();
        let service_types: Vec<_> = values.iter().filter(|a| a.code == attr::SERVICE_TYPE).collect();
        assert_eq!(service_types.len(), 1);
        assert_eq!(service_types[0].value, AttributeValue::Integer(2));
    }

    #[test]
    fn set_attribute_keeps_multiple_vendor_specific_entries() {
        let mut client = Client::new("radius.example.com", "secret");
        client.set_vendor_attribute(311, 11, vec![1, 2, 3]);
        client.set_vendor_attribute(311, 1, vec![4, 5, 6]);
        let values = client.common_attributes();
        let vendor_attrs: Vec<_> = values.iter().filter(|a| a.code == attr::VENDOR_SPECIFIC).collect();
        assert_eq!(vendor_attrs.len(), 2);
    }

    #[test]
    fn ms_chap_v1_accept_scenario() {
        let secret = b"xyzzy".to_vec();
        let secret_for_server = secret.clone();
        let addr = spawn_test_server(move |socket| {
            let mut buf = [0u8; 4096];
            let (n, peer) = socket.recv_from(&mut buf).unwrap();
            let req = decode_packet(&buf[..n]).unwrap();

            let vendor_attrs: Vec<_> = req.get_all(attr::VENDOR_SPECIFIC);
            assert_eq!(vendor_attrs.len(), 2, "expected challenge + response vendor attributes");
            for a in &vendor_attrs {
                match &a.value {
                    AttributeValue::Vendor {
                        vendor_id,
                        sub_attributes,
                    } => {
                        assert_eq!(*vendor_id, attr::MICROSOFT_VENDOR_ID);
                        let sub = &sub_attributes[0];
                        if sub.vendor_type == attr::MS_CHAP_CHALLENGE {
                            assert_eq!(sub.data.len(), 8);
                        } else if sub.vendor_type == attr::MS_CHAP_RESPONSE {
                            assert_eq!(sub.data.len(), 50);
                        } else {
                            panic!("unexpected vendor sub-attribute type {}", sub.vendor_type);
                        }
                    }
                    _ => panic!("expected vendor attribute value"),
                }
            }

            let accept = access_accept_for(&buf[..n], &secret_for_server);
            socket.send_to(&accept, peer).unwrap();
        });

        let mut client = Client::new(addr.to_string(), secret);
        let ok = client.authenticate_ms_chap_v1("alice", "Password1");
        assert!(ok, "error: {} ({})", client.last_error_message(), client.last_error_code());
    }

    // ---- EAP/MS-CHAPv2 fake-server scenarios (spec.md §8) ----
    //
    // A background thread plays the server side of the multi-round exchange,
    // scripted round by round against whatever the client actually sends.
    // Every Access-Challenge/Access-Accept it returns carries a real
    // Response-Authenticator over the Request-Authenticator the client used
    // for that round, exactly as `send_with_authenticator` will verify it.

    use crate::eap::{eap_code, format_failure_message, MsChapFailure};
    use std::net::{SocketAddr, UdpSocket};
    use std::thread;

    fn spawn_test_server(handler: impl FnOnce(UdpSocket) + Send + 'static) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || handler(socket));
        addr
    }

    fn recv_packet(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
        let mut buf = [0u8; 4096];
        let (n, peer) = socket.recv_from(&mut buf).unwrap();
        (buf[..n].to_vec(), peer)
    }

    fn decode_request_eap(req_bytes: &[u8]) -> EapPacket {
        let req = decode_packet(req_bytes).unwrap();
        let chunks: Vec<Vec<u8>> = req
            .get_all(attr::EAP_MESSAGE)
            .into_iter()
            .map(|a| a.value_bytes())
            .collect();
        EapPacket::decode(&join_eap_messages(&chunks)).unwrap()
    }

    /// Builds a response packet whose Response-Authenticator verifies
    /// against the Request-Authenticator of `req_bytes`, the same check
    /// `send_with_authenticator` performs on the client side.
    fn build_response(
        code: PacketCode,
        req_bytes: &[u8],
        secret: &[u8],
        attrs: &[Attribute],
    ) -> Vec<u8> {
        let req = decode_packet(req_bytes).unwrap();
        let zero_auth = [0u8; 16];
        let mut bytes = crate::codec::encode_packet(code, req.identifier, &zero_auth, attrs).unwrap();
        let total_len = bytes.len() as u16;
        let body = bytes[crate::codec::HEADER_LEN..].to_vec();
        let digest = response_authenticator(
            code.to_u8(),
            req.identifier,
            total_len,
            &req.authenticator,
            &body,
            secret,
        );
        bytes[4..20].copy_from_slice(&digest);
        bytes
    }

    fn build_challenge(req_bytes: &[u8], secret: &[u8], state: &[u8], eap: &EapPacket) -> Vec<u8> {
        let eap_bytes = eap.encode();
        let mut attrs = vec![Attribute::bytes(attr::STATE, state.to_vec())];
        for chunk in split_eap_message(&eap_bytes) {
            attrs.push(Attribute::bytes(attr::EAP_MESSAGE, chunk));
        }
        build_response(PacketCode::AccessChallenge, req_bytes, secret, &attrs)
    }

    fn access_accept_for(req_bytes: &[u8], secret: &[u8]) -> Vec<u8> {
        build_response(PacketCode::AccessAccept, req_bytes, secret, &[])
    }

    /// **EAP PEAP-then-MS-CHAP.** Server first proposes PEAP, the client NAKs
    /// to MS-Auth, the server challenges, the client responds, the server
    /// signals MS-CHAPv2 Success, the client sends EAP Success, the server
    /// grants Access-Accept.
    #[test]
    fn eap_ms_chap_v2_peap_then_mschap_accept_scenario() {
        let secret = b"xyzzy".to_vec();
        let auth_challenge = [0x5Au8; 16];
        let ms_chap_id = 10u8;

        let secret_for_server = secret.clone();
        let addr = spawn_test_server(move |socket| {
            let (req1, peer) = recv_packet(&socket);
            let eap1 = decode_request_eap(&req1);
            assert_eq!(eap1.type_code, Some(eap_type::IDENTITY));
            let peap_req = EapPacket {
                code: eap_code::REQUEST,
                id: 2,
                type_code: Some(eap_type::PEAP),
                data: Vec::new(),
            };
            let resp1 = build_challenge(&req1, &secret_for_server, b"st1", &peap_req);
            socket.send_to(&resp1, peer).unwrap();

            let (req2, peer) = recv_packet(&socket);
            let eap2 = decode_request_eap(&req2);
            assert_eq!(eap2.type_code, Some(eap_type::NAK));
            assert_eq!(eap2.data, vec![eap_type::MS_AUTH]);
            let challenge_packet = MsChap2Packet::Challenge {
                ms_chap_id,
                challenge: auth_challenge,
                name: b"server".to_vec(),
            };
            let ms_req = EapPacket {
                code: eap_code::REQUEST,
                id: 3,
                type_code: Some(eap_type::MS_AUTH),
                data: challenge_packet.encode(),
            };
            let resp2 = build_challenge(&req2, &secret_for_server, b"st2", &ms_req);
            socket.send_to(&resp2, peer).unwrap();

            let (req3, peer) = recv_packet(&socket);
            let eap3 = decode_request_eap(&req3);
            assert_eq!(eap3.type_code, Some(eap_type::MS_AUTH));
            match MsChap2Packet::decode(&eap3.data).unwrap() {
                MsChap2Packet::Response { ms_chap_id: got, .. } => assert_eq!(got, ms_chap_id),
                other => panic!("expected MS-CHAPv2 Response, got {other:?}"),
            }
            let success_packet = MsChap2Packet::Success {
                ms_chap_id,
                message: b"S=1".to_vec(),
            };
            let ms_resp = EapPacket {
                code: eap_code::REQUEST,
                id: 4,
                type_code: Some(eap_type::MS_AUTH),
                data: success_packet.encode(),
            };
            let resp3 = build_challenge(&req3, &secret_for_server, b"st3", &ms_resp);
            socket.send_to(&resp3, peer).unwrap();

            let (req4, peer) = recv_packet(&socket);
            let eap4 = decode_request_eap(&req4);
            assert_eq!(eap4.code, eap_code::SUCCESS);
            assert_eq!(eap4.id, ms_chap_id.wrapping_add(1));
            let accept = access_accept_for(&req4, &secret_for_server);
            socket.send_to(&accept, peer).unwrap();
        });

        let mut client = Client::new(addr.to_string(), secret);
        let ok = client.authenticate_eap_ms_chap_v2("alice", "Password1");
        assert!(
            ok,
            "expected acceptance, got error {} ({})",
            client.last_error_code(),
            client.last_error_message()
        );
    }

    /// **E=648 change-password.** Initial auth fails with E=648; the client
    /// (invoked via the change-password API) parses the 16-byte challenge
    /// from `C=`, sends a ChangePassword sub-packet split across several
    /// EAP-Message attributes, and completes the exchange on Access-Accept.
    #[test]
    fn eap_ms_chap_v2_change_password_on_e648_scenario() {
        let secret = b"xyzzy".to_vec();
        let auth_challenge = [0x7Bu8; 16];
        let challenge_ms_chap_id = 10u8;

        let secret_for_server = secret.clone();
        let addr = spawn_test_server(move |socket| {
            let (req1, peer) = recv_packet(&socket);
            decode_request_eap(&req1);
            let challenge_packet = MsChap2Packet::Challenge {
                ms_chap_id: challenge_ms_chap_id,
                challenge: auth_challenge,
                name: b"server".to_vec(),
            };
            let ms_req = EapPacket {
                code: eap_code::REQUEST,
                id: 2,
                type_code: Some(eap_type::MS_AUTH),
                data: challenge_packet.encode(),
            };
            let resp1 = build_challenge(&req1, &secret_for_server, b"st1", &ms_req);
            socket.send_to(&resp1, peer).unwrap();

            let (req2, peer) = recv_packet(&socket);
            let eap2 = decode_request_eap(&req2);
            assert_eq!(eap2.type_code, Some(eap_type::MS_AUTH));
            let failure = MsChapFailure {
                code: 648,
                retriable: false,
                challenge: Some(auth_challenge),
                version: 3,
                message: "Password expired".into(),
            };
            let failure_packet = MsChap2Packet::Failure {
                ms_chap_id: challenge_ms_chap_id,
                message: format_failure_message(&failure),
            };
            let ms_resp = EapPacket {
                code: eap_code::REQUEST,
                id: 3,
                type_code: Some(eap_type::MS_AUTH),
                data: failure_packet.encode(),
            };
            let resp2 = build_challenge(&req2, &secret_for_server, b"st2", &ms_resp);
            socket.send_to(&resp2, peer).unwrap();

            let (req3, peer) = recv_packet(&socket);
            let req3_decoded = decode_packet(&req3).unwrap();
            let eap_chunks = req3_decoded.get_all(attr::EAP_MESSAGE);
            assert!(
                eap_chunks.len() > 1,
                "ChangePassword payload should split across multiple EAP-Message attributes"
            );
            let eap3 = decode_request_eap(&req3);
            assert_eq!(eap3.type_code, Some(eap_type::MS_AUTH));
            let change_ms_chap_id = match MsChap2Packet::decode(&eap3.data).unwrap() {
                MsChap2Packet::ChangePassword { ms_chap_id, .. } => ms_chap_id,
                other => panic!("expected MS-CHAPv2 ChangePassword, got {other:?}"),
            };
            let success_packet = MsChap2Packet::Success {
                ms_chap_id: change_ms_chap_id,
                message: b"S=1".to_vec(),
            };
            let ms_resp2 = EapPacket {
                code: eap_code::REQUEST,
                id: 4,
                type_code: Some(eap_type::MS_AUTH),
                data: success_packet.encode(),
            };
            let resp3 = build_challenge(&req3, &secret_for_server, b"st3", &ms_resp2);
            socket.send_to(&resp3, peer).unwrap();

            let (req4, peer) = recv_packet(&socket);
            let eap4 = decode_request_eap(&req4);
            assert_eq!(eap4.code, eap_code::SUCCESS);
            assert_eq!(eap4.id, change_ms_chap_id.wrapping_add(1));
            let accept = access_accept_for(&req4, &secret_for_server);
            socket.send_to(&accept, peer).unwrap();
        });

        let mut client = Client::new(addr.to_string(), secret);
        let ok = client.change_password_eap_ms_chap_v2("alice", "OldPassword1", "NewPassword1");
        assert!(
            ok,
            "expected acceptance, got error {} ({})",
            client.last_error_code(),
            client.last_error_message()
        );
    }
}
