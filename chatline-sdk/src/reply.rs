//! Numeric reply codes (RFC 1459 / RFC 2812).
//!
//! Only codes listed here are accepted by the parser; anything else is an
//! unrecognized line.

use std::fmt;

macro_rules! reply_codes {
    ($($name:ident = $code:literal,)+) => {
        /// A recognized numeric reply.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum ReplyCode {
            $($name = $code,)+
        }

        impl ReplyCode {
            /// Look up a numeric code. `None` for codes this client does not know.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(ReplyCode::$name),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(ReplyCode::$name => stringify!($name),)+
                }
            }
        }
    };
}

reply_codes! {
    RPL_WELCOME = 1,
    RPL_YOURHOST = 2,
    RPL_CREATED = 3,
    RPL_MYINFO = 4,
    RPL_ISUPPORT = 5,
    RPL_BOUNCE = 10,
    RPL_UMODEIS = 221,
    RPL_STATSCONN = 250,
    RPL_LUSERCLIENT = 251,
    RPL_LUSEROP = 252,
    RPL_LUSERUNKNOWN = 253,
    RPL_LUSERCHANNELS = 254,
    RPL_LUSERME = 255,
    RPL_ADMINME = 256,
    RPL_LOCALUSERS = 265,
    RPL_GLOBALUSERS = 266,
    RPL_AWAY = 301,
    RPL_USERHOST = 302,
    RPL_ISON = 303,
    RPL_UNAWAY = 305,
    RPL_NOWAWAY = 306,
    RPL_WHOISUSER = 311,
    RPL_WHOISSERVER = 312,
    RPL_WHOISOPERATOR = 313,
    RPL_WHOWASUSER = 314,
    RPL_ENDOFWHO = 315,
    RPL_WHOISIDLE = 317,
    RPL_ENDOFWHOIS = 318,
    RPL_WHOISCHANNELS = 319,
    RPL_LISTSTART = 321,
    RPL_LIST = 322,
    RPL_LISTEND = 323,
    RPL_CHANNELMODEIS = 324,
    RPL_CREATIONTIME = 329,
    RPL_WHOISACCOUNT = 330,
    RPL_NOTOPIC = 331,
    RPL_TOPIC = 332,
    RPL_TOPICWHOTIME = 333,
    RPL_INVITING = 341,
    RPL_VERSION = 351,
    RPL_WHOREPLY = 352,
    RPL_NAMREPLY = 353,
    RPL_LINKS = 364,
    RPL_ENDOFLINKS = 365,
    RPL_ENDOFNAMES = 366,
    RPL_BANLIST = 367,
    RPL_ENDOFBANLIST = 368,
    RPL_ENDOFWHOWAS = 369,
    RPL_INFO = 371,
    RPL_MOTD = 372,
    RPL_ENDOFINFO = 374,
    RPL_MOTDSTART = 375,
    RPL_ENDOFMOTD = 376,
    RPL_YOUREOPER = 381,
    RPL_TIME = 391,
    ERR_NOSUCHNICK = 401,
    ERR_NOSUCHSERVER = 402,
    ERR_NOSUCHCHANNEL = 403,
    ERR_CANNOTSENDTOCHAN = 404,
    ERR_TOOMANYCHANNELS = 405,
    ERR_UNKNOWNCOMMAND = 421,
    ERR_NOMOTD = 422,
    ERR_NONICKNAMEGIVEN = 431,
    ERR_ERRONEUSNICKNAME = 432,
    ERR_NICKNAMEINUSE = 433,
    ERR_NICKCOLLISION = 436,
    ERR_USERNOTINCHANNEL = 441,
    ERR_NOTONCHANNEL = 442,
    ERR_NOTREGISTERED = 451,
    ERR_NEEDMOREPARAMS = 461,
    ERR_ALREADYREGISTRED = 462,
    ERR_PASSWDMISMATCH = 464,
    ERR_YOUREBANNEDCREEP = 465,
    ERR_CHANNELISFULL = 471,
    ERR_UNKNOWNMODE = 472,
    ERR_INVITEONLYCHAN = 473,
    ERR_BANNEDFROMCHAN = 474,
    ERR_BADCHANNELKEY = 475,
    ERR_NOPRIVILEGES = 481,
    ERR_CHANOPRIVSNEEDED = 482,
}

impl ReplyCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn is_error(self) -> bool {
        self.code() >= 400
    }
}

/// Renders the three-digit wire form, e.g. `001`.
impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve() {
        assert_eq!(ReplyCode::from_code(1), Some(ReplyCode::RPL_WELCOME));
        assert_eq!(ReplyCode::from_code(353), Some(ReplyCode::RPL_NAMREPLY));
        assert_eq!(ReplyCode::from_code(366), Some(ReplyCode::RPL_ENDOFNAMES));
    }

    #[test]
    fn unknown_codes_do_not_resolve() {
        assert_eq!(ReplyCode::from_code(0), None);
        assert_eq!(ReplyCode::from_code(999), None);
    }

    #[test]
    fn display_is_zero_padded() {
        assert_eq!(ReplyCode::RPL_WELCOME.to_string(), "001");
        assert_eq!(ReplyCode::ERR_NICKNAMEINUSE.to_string(), "433");
        assert_eq!(ReplyCode::RPL_NAMREPLY.name(), "RPL_NAMREPLY");
        assert!(ReplyCode::ERR_NICKNAMEINUSE.is_error());
    }
}
